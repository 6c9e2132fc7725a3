use std::{fmt, time::Duration};

use crate::AssertionKind;

/// Identifier the backend hands out for a created assertion. Zero is never a live assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssertionId(pub u32);

impl AssertionId {
  pub const NONE: AssertionId = AssertionId(0);

  pub fn is_none(self) -> bool {
    self == Self::NONE
  }
}

/// Raw status code reported by the power management backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
  /// kIOReturnError, the general failure code
  pub const ERROR: ReturnCode = ReturnCode(0xe00002bc_u32 as i32);
}

impl fmt::Display for ReturnCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#010x}", self.0)
  }
}

/// The power management capability the manager drives.
///
/// Implementations must be callable from any thread: the manager may release assertions from the
/// watcher thread when the watched process exits.
pub trait AssertionBackend: Send + Sync + 'static {
  /// Create a held assertion. Only called with kinds where [`AssertionKind::is_held`] is true.
  fn create(&self, kind: AssertionKind, reason: &str) -> Result<AssertionId, ReturnCode>;

  fn declare_user_activity(&self, reason: &str) -> Result<AssertionId, ReturnCode>;

  /// Errors are logged by the caller and otherwise ignored.
  fn release(&self, id: AssertionId) -> Result<(), ReturnCode>;

  /// Ask the backend to drop the assertion on its own once `timeout` elapses.
  fn set_timeout(&self, id: AssertionId, timeout: Duration) -> Result<(), ReturnCode>;
}

impl<B: AssertionBackend> AssertionBackend for std::sync::Arc<B> {
  fn create(&self, kind: AssertionKind, reason: &str) -> Result<AssertionId, ReturnCode> {
    (**self).create(kind, reason)
  }

  fn declare_user_activity(&self, reason: &str) -> Result<AssertionId, ReturnCode> {
    (**self).declare_user_activity(reason)
  }

  fn release(&self, id: AssertionId) -> Result<(), ReturnCode> {
    (**self).release(id)
  }

  fn set_timeout(&self, id: AssertionId, timeout: Duration) -> Result<(), ReturnCode> {
    (**self).set_timeout(id, timeout)
  }
}
