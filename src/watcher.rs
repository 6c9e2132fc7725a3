use std::{
  io,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, error, trace};

use crate::{
  sys::{EventQueue, Pipe, Wakeup},
  Error,
};

/// Upper bound on how long the monitor blocks before looking at the cancel flag again.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How a watcher's monitor loop ended. Reported exactly once.
#[derive(Debug)]
pub(crate) enum WatchOutcome {
  Exited,
  Cancelled,
  Failed(io::Error),
}

struct Descriptors {
  queue: EventQueue,
  pipe: Pipe,
}

struct WatchState {
  cancelled: AtomicBool,
  running: AtomicBool,
  // The monitor holds a read guard only while blocked in the bounded wait. Teardown takes the
  // write guard to close, so a descriptor is never closed (or its number reused) under a wait.
  descriptors: RwLock<Option<Descriptors>>,
}

/// Background monitor for the exit of one process.
pub(crate) struct ExitWatcher {
  pid: i32,
  state: Arc<WatchState>,
  thread: Option<JoinHandle<()>>,
}

impl ExitWatcher {
  /// Set up the pipe and event queue, then start monitoring on a new thread.
  ///
  /// Either everything is in place and the thread is running, or nothing is left open.
  pub(crate) fn spawn<F>(pid: i32, on_outcome: F) -> Result<Self, Error>
  where
    F: FnOnce(WatchOutcome) + Send + 'static,
  {
    let pipe = Pipe::new()?;
    let mut queue = EventQueue::new().map_err(Error::EventQueueCreation)?;
    queue.watch_exit(pid).map_err(|err| {
      // it died between the liveness check and registration
      if err.raw_os_error() == Some(libc::ESRCH) {
        Error::ProcessNotFound(pid)
      } else {
        Error::EventRegistration(err)
      }
    })?;
    queue
      .watch_readable(pipe.read_fd())
      .map_err(Error::EventRegistration)?;

    let state = Arc::new(WatchState {
      cancelled: AtomicBool::new(false),
      running: AtomicBool::new(true),
      descriptors: RwLock::new(Some(Descriptors { queue, pipe })),
    });

    let thread_state = state.clone();
    let thread = thread::Builder::new()
      .name(format!("pid-watch-{pid}"))
      .spawn(move || {
        let outcome = monitor(&thread_state, pid);
        thread_state.running.store(false, Ordering::SeqCst);
        on_outcome(outcome);
      })
      .map_err(Error::WatcherSpawn)?;

    debug!(pid, "watching process");
    Ok(Self {
      pid,
      state,
      thread: Some(thread),
    })
  }

  pub(crate) fn pid(&self) -> i32 {
    self.pid
  }

  pub(crate) fn is_running(&self) -> bool {
    self.state.running.load(Ordering::SeqCst)
  }

  /// Cancel the monitor and close every descriptor. Safe to call more than once and after the
  /// monitor has already finished on its own.
  ///
  /// Hands back the monitor thread on the first call so the caller can join it once it holds no
  /// locks the monitor's outcome handler might want.
  pub(crate) fn teardown(&mut self) -> Option<JoinHandle<()>> {
    self.state.cancelled.store(true, Ordering::SeqCst);

    if let Some(descriptors) = self
      .state
      .descriptors
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
    {
      descriptors.pipe.notify();
    }

    let closed = self
      .state
      .descriptors
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if closed.is_some() {
      trace!(pid = self.pid, "watcher descriptors closed");
    }
    drop(closed);

    self.thread.take()
  }
}

impl Drop for ExitWatcher {
  fn drop(&mut self) {
    if let Some(thread) = self.teardown() {
      join_monitor(thread);
    }
  }
}

/// Wait for a monitor thread to finish, unless we are that thread.
pub(crate) fn join_monitor(thread: JoinHandle<()>) {
  if thread.thread().id() == thread::current().id() {
    // stopping from inside the outcome handler, the loop is already done
    return;
  }
  if thread.join().is_err() {
    error!("watcher thread panicked");
  }
}

fn monitor(state: &WatchState, pid: i32) -> WatchOutcome {
  loop {
    if state.cancelled.load(Ordering::SeqCst) {
      return WatchOutcome::Cancelled;
    }

    let guard = state
      .descriptors
      .read()
      .unwrap_or_else(PoisonError::into_inner);
    let Some(descriptors) = guard.as_ref() else {
      return WatchOutcome::Cancelled;
    };
    let result = descriptors.queue.wait(POLL_INTERVAL);
    drop(guard);

    match result {
      Ok(Wakeup::TimedOut) => trace!(pid, "watch wait timed out"),
      Ok(Wakeup::ProcessExited) => return WatchOutcome::Exited,
      Ok(Wakeup::Readable) => return WatchOutcome::Cancelled,
      Err(err) => match classify(err) {
        Some(outcome) => return outcome,
        None => trace!(pid, "watch wait interrupted"),
      },
    }
  }
}

/// What a failed wait means for the monitor. `None` means wait again.
fn classify(err: io::Error) -> Option<WatchOutcome> {
  match err.raw_os_error() {
    Some(libc::EINTR) => None,
    // descriptors closed under us by teardown
    Some(libc::EBADF) => Some(WatchOutcome::Cancelled),
    _ => Some(WatchOutcome::Failed(err)),
  }
}

#[cfg(test)]
mod tests {
  use std::{
    process::{Child, Command},
    sync::mpsc,
  };

  use super::*;

  fn spawn_sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
  }

  fn reaped_pid() -> i32 {
    let mut child = spawn_sleeper();
    child.kill().unwrap();
    child.wait().unwrap();
    child.id() as i32
  }

  fn watch(pid: i32) -> (ExitWatcher, mpsc::Receiver<WatchOutcome>) {
    let (tx, rx) = mpsc::channel();
    let watcher = ExitWatcher::spawn(pid, move |outcome| {
      let _ = tx.send(outcome);
    })
    .unwrap();
    (watcher, rx)
  }

  #[test]
  fn reports_exit() {
    let mut child = spawn_sleeper();
    let (watcher, rx) = watch(child.id() as i32);
    assert!(watcher.is_running());

    child.kill().unwrap();
    let outcome = rx.recv_timeout(2 * POLL_INTERVAL).unwrap();
    child.wait().unwrap();

    assert!(matches!(outcome, WatchOutcome::Exited));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(!watcher.is_running());
  }

  #[test]
  fn teardown_cancels_without_exit() {
    let mut child = spawn_sleeper();
    let (mut watcher, rx) = watch(child.id() as i32);

    let thread = watcher.teardown().unwrap();
    join_monitor(thread);

    assert!(matches!(rx.try_recv().unwrap(), WatchOutcome::Cancelled));
    assert!(!watcher.is_running());

    child.kill().unwrap();
    child.wait().unwrap();
  }

  #[test]
  fn teardown_is_idempotent() {
    let mut child = spawn_sleeper();
    let (mut watcher, _rx) = watch(child.id() as i32);

    assert!(watcher.teardown().is_some());
    assert!(watcher.teardown().is_none());
    drop(watcher);

    child.kill().unwrap();
    child.wait().unwrap();
  }

  #[test]
  fn teardown_after_exit_is_harmless() {
    let mut child = spawn_sleeper();
    let (mut watcher, rx) = watch(child.id() as i32);
    child.kill().unwrap();
    child.wait().unwrap();
    assert!(matches!(
      rx.recv_timeout(2 * POLL_INTERVAL).unwrap(),
      WatchOutcome::Exited
    ));

    join_monitor(watcher.teardown().unwrap());
    assert!(watcher.teardown().is_none());
  }

  #[test]
  fn missing_process_is_not_found() {
    let pid = reaped_pid();
    let err = ExitWatcher::spawn(pid, |_| {}).err().unwrap();
    assert!(matches!(err, Error::ProcessNotFound(p) if p == pid));
  }

  fn open_descriptors() -> usize {
    std::fs::read_dir("/dev/fd").unwrap().count()
  }

  #[test]
  fn failed_registration_closes_pipe_and_queue() {
    let pid = reaped_pid();
    // other tests in this binary open descriptors concurrently, so a clean window may take a
    // few attempts. A leak costs at least three descriptors per spawn and never balances out.
    let balanced = (0..10).any(|_| {
      let before = open_descriptors();
      for _ in 0..20 {
        assert!(ExitWatcher::spawn(pid, |_| {}).is_err());
      }
      open_descriptors() == before
    });
    assert!(balanced);
  }

  fn os_error(errno: i32) -> io::Error {
    io::Error::from_raw_os_error(errno)
  }

  #[test]
  fn interrupted_wait_is_retried() {
    assert!(classify(os_error(libc::EINTR)).is_none());
  }

  #[test]
  fn closed_descriptor_ends_as_cancelled() {
    assert!(matches!(
      classify(os_error(libc::EBADF)),
      Some(WatchOutcome::Cancelled)
    ));
  }

  #[test]
  fn other_wait_errors_fail_the_watch() {
    match classify(os_error(libc::EINVAL)) {
      Some(WatchOutcome::Failed(err)) => assert_eq!(err.raw_os_error(), Some(libc::EINVAL)),
      other => panic!("expected Failed, got {other:?}"),
    }
  }

  #[test]
  fn drop_stops_the_monitor() {
    let mut child = spawn_sleeper();
    let (watcher, rx) = watch(child.id() as i32);
    drop(watcher);
    assert!(matches!(rx.try_recv().unwrap(), WatchOutcome::Cancelled));

    child.kill().unwrap();
    child.wait().unwrap();
  }
}
