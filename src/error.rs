use std::io;

use crate::{AssertionKind, ReturnCode};

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("failed to create {kind} assertion. status={status}")]
  AssertionCreation {
    kind: AssertionKind,
    status: ReturnCode,
  },

  #[error("failed to declare user activity. status={0}")]
  UserActivityDeclaration(ReturnCode),

  #[error("failed to create signalling pipe")]
  PipeCreation(#[source] io::Error),

  #[error("failed to configure descriptor")]
  DescriptorConfiguration(#[source] io::Error),

  #[error("failed to create kernel event queue")]
  EventQueueCreation(#[source] io::Error),

  #[error("failed to register kernel event")]
  EventRegistration(#[source] io::Error),

  #[error("failed to spawn watcher thread")]
  WatcherSpawn(#[source] io::Error),

  #[error("process {0} not found")]
  ProcessNotFound(i32),

  #[error("invalid pid {0}")]
  InvalidPid(i32),
}
