#![warn(clippy::all)]

//! Hold OS keep-awake assertions, optionally until some other process exits.
//!
//! ```no_run
//! # #[cfg(target_os = "macos")]
//! # fn main() -> Result<(), nodoze::Error> {
//! use nodoze::{AssertionKind, ManagerConfig, SleepManager};
//!
//! let config = ManagerConfig::new("rendering video")
//!   .kinds([AssertionKind::PreventSystemIdleSleep])
//!   .watch_pid(4242);
//! let manager = SleepManager::new(config);
//! manager.start()?;
//! // ... the assertion goes away on stop(), or as soon as pid 4242 exits
//! manager.stop();
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "macos"))]
//! # fn main() {}
//! ```

mod backend;
mod config;
mod error;
mod kind;
mod liveness;
mod manager;
mod sys;
mod watcher;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::IOKitBackend;

pub use backend::{AssertionBackend, AssertionId, ReturnCode};
pub use config::ManagerConfig;
pub use error::Error;
pub use kind::{AssertionKind, ParseKindError};
pub use manager::{SleepManager, TerminationHandler};
pub use liveness::process_exists;
