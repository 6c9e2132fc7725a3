#![allow(dead_code)]

use std::{
  collections::HashSet,
  process::{Child, Command},
  sync::{Mutex, Once},
  time::{Duration, Instant},
};

use nodoze::{AssertionBackend, AssertionId, AssertionKind, ReturnCode};

pub fn init_tracing() {
  static INIT: Once = Once::new();
  INIT.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
}

/// In-memory backend that tracks which assertions are live.
#[derive(Default)]
pub struct FakeBackend {
  state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
  next_id: u32,
  live: HashSet<AssertionId>,
  created: usize,
}

impl FakeBackend {
  pub fn live(&self) -> usize {
    self.state.lock().unwrap().live.len()
  }

  pub fn created(&self) -> usize {
    self.state.lock().unwrap().created
  }
}

impl AssertionBackend for FakeBackend {
  fn create(&self, _kind: AssertionKind, _reason: &str) -> Result<AssertionId, ReturnCode> {
    let mut state = self.state.lock().unwrap();
    state.next_id += 1;
    state.created += 1;
    let id = AssertionId(state.next_id);
    state.live.insert(id);
    Ok(id)
  }

  fn declare_user_activity(&self, reason: &str) -> Result<AssertionId, ReturnCode> {
    self.create(AssertionKind::DeclareUserActivity, reason)
  }

  fn release(&self, id: AssertionId) -> Result<(), ReturnCode> {
    let removed = self.state.lock().unwrap().live.remove(&id);
    assert!(removed, "release of unknown or already released {id:?}");
    Ok(())
  }

  fn set_timeout(&self, _id: AssertionId, _timeout: Duration) -> Result<(), ReturnCode> {
    Ok(())
  }
}

pub fn spawn_sleeper() -> Child {
  Command::new("sleep").arg("60").spawn().unwrap()
}

/// Pid of a process that has exited and been reaped.
pub fn dead_pid() -> i32 {
  let mut child = spawn_sleeper();
  child.kill().unwrap();
  child.wait().unwrap();
  child.id() as i32
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(10));
  }
  condition()
}
