use std::time::Duration;

use tracing::{debug, warn};

use crate::{AssertionKind, Error};

/// What a [`SleepManager`](crate::SleepManager) should hold and for how long.
///
/// Values are normalized as they're set so the manager never has to second guess them:
/// duplicate kinds collapse, an empty kind list means [`AssertionKind::DEFAULT`], a zero timeout
/// means no timeout, and a pid <= 0 disables watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
  kinds: Vec<AssertionKind>,
  reason: String,
  timeout: Option<Duration>,
  watch_pid: Option<i32>,
}

impl ManagerConfig {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      kinds: AssertionKind::DEFAULT.to_vec(),
      reason: reason.into(),
      timeout: None,
      watch_pid: None,
    }
  }

  pub fn kinds<I>(mut self, kinds: I) -> Self
  where
    I: IntoIterator<Item = AssertionKind>,
  {
    let mut unique = Vec::new();
    for kind in kinds {
      if !unique.contains(&kind) {
        unique.push(kind);
      }
    }
    if unique.is_empty() {
      debug!("no assertion kinds given, using defaults");
      unique = AssertionKind::DEFAULT.to_vec();
    }
    self.kinds = unique;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    if timeout.is_zero() {
      debug!("zero timeout requested, assertions will not expire");
      self.timeout = None;
    } else {
      if self.kinds.contains(&AssertionKind::DeclareUserActivity) {
        debug!("timeout does not apply to {}", AssertionKind::DeclareUserActivity);
      }
      self.timeout = Some(timeout);
    }
    self
  }

  /// Tie the assertions to the lifetime of `pid`. An invalid pid is logged and ignored.
  pub fn watch_pid(mut self, pid: i32) -> Self {
    match validate_pid(pid) {
      Ok(pid) => self.watch_pid = Some(pid),
      Err(err) => {
        warn!(pid, "{err}, process watching disabled");
        self.watch_pid = None;
      }
    }
    self
  }

  pub fn assertion_kinds(&self) -> &[AssertionKind] {
    &self.kinds
  }

  pub fn reason(&self) -> &str {
    &self.reason
  }

  pub fn assertion_timeout(&self) -> Option<Duration> {
    self.timeout
  }

  pub fn watched_pid(&self) -> Option<i32> {
    self.watch_pid
  }
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self::new(concat!(env!("CARGO_PKG_NAME"), " keep-awake"))
  }
}

fn validate_pid(pid: i32) -> Result<i32, Error> {
  if pid > 0 {
    Ok(pid)
  } else {
    Err(Error::InvalidPid(pid))
  }
}
