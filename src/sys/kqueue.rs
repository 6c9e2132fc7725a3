use std::{
  io,
  os::fd::{AsRawFd, OwnedFd, RawFd},
  ptr::null_mut,
  time::Duration,
};

use super::{owned_fd, Wakeup};

/// kqueue with an `EVFILT_PROC`/`NOTE_EXIT` watch and an `EVFILT_READ` watch.
#[derive(Debug)]
pub(crate) struct EventQueue {
  kq: OwnedFd,
}

impl EventQueue {
  pub(crate) fn new() -> io::Result<Self> {
    // SAFETY: kqueue() has no preconditions, returns -1 on error
    let kq = owned_fd(unsafe { libc::kqueue() })?;
    Ok(Self { kq })
  }

  /// One-shot: the kernel drops the filter after it fires.
  pub(crate) fn watch_exit(&mut self, pid: i32) -> io::Result<()> {
    self.register(libc::kevent {
      ident: pid as libc::uintptr_t,
      filter: libc::EVFILT_PROC,
      flags: libc::EV_ADD | libc::EV_ONESHOT,
      fflags: libc::NOTE_EXIT,
      data: 0,
      udata: null_mut(),
    })
  }

  /// Level triggered: fires for as long as there's unread data.
  pub(crate) fn watch_readable(&mut self, fd: RawFd) -> io::Result<()> {
    self.register(libc::kevent {
      ident: fd as libc::uintptr_t,
      filter: libc::EVFILT_READ,
      flags: libc::EV_ADD,
      fflags: 0,
      data: 0,
      udata: null_mut(),
    })
  }

  fn register(&mut self, change: libc::kevent) -> io::Result<()> {
    // SAFETY: kq is a valid kqueue fd, change is a single valid kevent and no events are requested
    let ret = unsafe {
      libc::kevent(
        self.kq.as_raw_fd(),
        &change,
        1,
        null_mut(),
        0,
        std::ptr::null(),
      )
    };
    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }

  pub(crate) fn wait(&self, timeout: Duration) -> io::Result<Wakeup> {
    let timeout = libc::timespec {
      tv_sec: timeout.as_secs() as libc::time_t,
      tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    // SAFETY: an all-zero kevent is a valid value, it's only written by the kernel
    let mut events: [libc::kevent; 2] = unsafe { std::mem::zeroed() };

    // SAFETY: kq is a valid kqueue fd, events has room for events.len() entries
    let n = unsafe {
      libc::kevent(
        self.kq.as_raw_fd(),
        std::ptr::null(),
        0,
        events.as_mut_ptr(),
        events.len() as libc::c_int,
        &timeout,
      )
    };
    if n < 0 {
      return Err(io::Error::last_os_error());
    }

    let fired = &events[..n as usize];
    // a shutdown request wins over a simultaneous exit so the owner isn't asked to stop twice
    if fired.iter().any(|ev| ev.filter == libc::EVFILT_READ) {
      Ok(Wakeup::Readable)
    } else if fired
      .iter()
      .any(|ev| ev.filter == libc::EVFILT_PROC && ev.fflags & libc::NOTE_EXIT != 0)
    {
      Ok(Wakeup::ProcessExited)
    } else {
      Ok(Wakeup::TimedOut)
    }
  }
}
