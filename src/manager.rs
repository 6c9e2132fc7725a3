use std::{
  collections::BTreeSet,
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
  thread::JoinHandle,
};

use tracing::{debug, error, info, trace, warn};

use crate::{
  liveness::process_exists,
  watcher::{join_monitor, ExitWatcher, WatchOutcome},
  AssertionBackend, AssertionId, AssertionKind, Error, ManagerConfig,
};

/// Called after every `stop` that actually released something.
pub type TerminationHandler = dyn Fn(&SleepManager) + Send + Sync;

/// Holds a set of keep-awake assertions, optionally for as long as another process lives.
///
/// All operations serialize on one lock, so a manager can be shared between threads (wrap it in
/// an `Arc`). Release happens on `stop`, when the watched process exits, or as a fallback when
/// the manager is dropped while still active.
pub struct SleepManager {
  shared: Arc<Shared>,
}

struct Shared {
  config: ManagerConfig,
  backend: Box<dyn AssertionBackend>,
  state: Mutex<State>,
  on_stop: Mutex<Option<Arc<TerminationHandler>>>,
}

#[derive(Default)]
struct State {
  // creation order, kinds unique
  assertions: Vec<(AssertionKind, AssertionId)>,
  watcher: Option<ExitWatcher>,
  // bumped by every start so a late exit report can't stop a newer session
  session: u64,
}

impl State {
  fn is_active(&self) -> bool {
    !self.assertions.is_empty() || self.watcher.as_ref().is_some_and(ExitWatcher::is_running)
  }

  fn holds_anything(&self) -> bool {
    !self.assertions.is_empty() || self.watcher.is_some()
  }
}

impl SleepManager {
  /// Manager backed by IOKit power assertions.
  #[cfg(target_os = "macos")]
  pub fn new(config: ManagerConfig) -> Self {
    Self::with_backend(config, crate::IOKitBackend)
  }

  pub fn with_backend<B>(config: ManagerConfig, backend: B) -> Self
  where
    B: AssertionBackend,
  {
    debug!(
      kinds = ?config.assertion_kinds(),
      timeout = ?config.assertion_timeout(),
      pid = ?config.watched_pid(),
      "sleep manager created"
    );
    Self {
      shared: Arc::new(Shared {
        config,
        backend: Box::new(backend),
        state: Mutex::new(State::default()),
        on_stop: Mutex::new(None),
      }),
    }
  }

  pub fn config(&self) -> &ManagerConfig {
    &self.shared.config
  }

  /// The process whose exit releases the assertions, if any.
  pub fn watched_pid(&self) -> Option<i32> {
    self.shared.config.watched_pid()
  }

  pub fn set_termination_handler<F>(&self, handler: F)
  where
    F: Fn(&SleepManager) + Send + Sync + 'static,
  {
    let handler: Arc<TerminationHandler> = Arc::new(handler);
    *lock(&self.shared.on_stop) = Some(handler);
  }

  pub fn clear_termination_handler(&self) {
    *lock(&self.shared.on_stop) = None;
  }

  /// Take every configured assertion and, if configured, start watching the process.
  ///
  /// All or nothing: on error every assertion created by this call has been released and no
  /// watcher is left behind. Calling `start` on an active manager does nothing.
  pub fn start(&self) -> Result<(), Error> {
    let mut state = self.shared.lock();
    if state.is_active() {
      debug!("already active, nothing to start");
      return Ok(());
    }

    // a watcher whose loop already died on its own
    let stale = state.watcher.take().and_then(|mut watcher| watcher.teardown());

    state.session += 1;
    let result = self.activate(&mut state);
    let rolled_back = match &result {
      Ok(()) => None,
      Err(err) => {
        warn!("start failed, rolling back: {err}");
        release_all(&*self.shared.backend, &mut state)
      }
    };
    let kinds: Vec<_> = state.assertions.iter().map(|(kind, _)| *kind).collect();
    drop(state);

    for thread in stale.into_iter().chain(rolled_back) {
      join_monitor(thread);
    }

    if result.is_ok() {
      info!(?kinds, pid = ?self.watched_pid(), "keeping awake");
    }
    result
  }

  fn activate(&self, state: &mut State) -> Result<(), Error> {
    for &kind in self.shared.config.assertion_kinds() {
      let id = self.shared.create(kind)?;
      state.assertions.push((kind, id));
    }

    if let Some(pid) = self.shared.config.watched_pid() {
      if !process_exists(pid) {
        return Err(Error::ProcessNotFound(pid));
      }
      let on_outcome = exit_handler(Arc::downgrade(&self.shared), pid, state.session);
      state.watcher = Some(ExitWatcher::spawn(pid, on_outcome)?);
    }
    Ok(())
  }

  /// Stop watching, release every assertion, then run the termination handler.
  ///
  /// Does nothing (and skips the handler) when there's nothing to stop.
  pub fn stop(&self) {
    self.shutdown(None);
  }

  /// Same as [`stop`](Self::stop), for callers that want to end the manager's life explicitly
  /// instead of relying on drop.
  pub fn close(self) {
    self.stop();
  }

  fn shutdown(&self, session: Option<u64>) {
    let mut state = self.shared.lock();
    if !state.holds_anything() {
      trace!("already inactive, nothing to stop");
      return;
    }
    if session.is_some_and(|session| session != state.session) {
      trace!("stop request from an older session ignored");
      return;
    }

    let thread = release_all(&*self.shared.backend, &mut state);
    drop(state);

    if let Some(thread) = thread {
      join_monitor(thread);
    }
    info!("assertions released");

    let handler = lock(&self.shared.on_stop).clone();
    if let Some(handler) = handler {
      (*handler)(self);
    }
  }

  /// True while any assertion is held or the watcher is still running.
  pub fn is_active(&self) -> bool {
    self.shared.lock().is_active()
  }

  pub fn is_watching(&self) -> bool {
    self
      .shared
      .lock()
      .watcher
      .as_ref()
      .is_some_and(ExitWatcher::is_running)
  }

  pub fn active_assertion_kinds(&self) -> BTreeSet<AssertionKind> {
    self
      .shared
      .lock()
      .assertions
      .iter()
      .map(|(kind, _)| *kind)
      .collect()
  }
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, State> {
    lock(&self.state)
  }

  fn create(&self, kind: AssertionKind) -> Result<AssertionId, Error> {
    let reason = self.config.reason();
    if !kind.is_held() {
      return self
        .backend
        .declare_user_activity(reason)
        .map_err(Error::UserActivityDeclaration);
    }

    let id = self
      .backend
      .create(kind, reason)
      .map_err(|status| Error::AssertionCreation { kind, status })?;
    debug!(%kind, id = id.0, "assertion created");

    if let Some(timeout) = self.config.assertion_timeout() {
      if let Err(status) = self.backend.set_timeout(id, timeout) {
        warn!(%kind, %status, "failed to set assertion timeout, it will be held until released");
      }
    }
    Ok(id)
  }
}

impl Drop for Shared {
  fn drop(&mut self) {
    let backend = &*self.backend;
    let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
    if !state.holds_anything() {
      return;
    }
    warn!("sleep manager dropped while active, releasing assertions");
    if let Some(thread) = release_all(backend, state) {
      join_monitor(thread);
    }
  }
}

/// The one place watchers are torn down and assertions released. Keeps going past failures.
fn release_all(backend: &dyn AssertionBackend, state: &mut State) -> Option<JoinHandle<()>> {
  let thread = state
    .watcher
    .take()
    .and_then(|mut watcher| {
      debug!(pid = watcher.pid(), "stopping process watch");
      watcher.teardown()
    });

  for (kind, id) in state.assertions.drain(..) {
    if id.is_none() {
      continue;
    }
    match backend.release(id) {
      Ok(()) => debug!(%kind, id = id.0, "assertion released"),
      Err(status) => warn!(%kind, id = id.0, %status, "failed to release assertion"),
    }
  }
  thread
}

fn exit_handler(
  shared: Weak<Shared>,
  pid: i32,
  session: u64,
) -> impl FnOnce(WatchOutcome) + Send + 'static {
  move |outcome| match outcome {
    WatchOutcome::Exited => {
      info!(pid, "watched process exited");
      if let Some(shared) = shared.upgrade() {
        SleepManager { shared }.shutdown(Some(session));
      }
    }
    WatchOutcome::Cancelled => trace!(pid, "process watch cancelled"),
    WatchOutcome::Failed(err) => error!(pid, "process watch stopped: {err}"),
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
