use std::{
  io,
  os::fd::{AsRawFd, OwnedFd, RawFd},
  time::Duration,
};

use super::{owned_fd, Wakeup};

const EXIT_TOKEN: u64 = 1;
const READ_TOKEN: u64 = 2;

/// epoll over a pidfd (readable once the process exits) and the pipe's read end.
#[derive(Debug)]
pub(crate) struct EventQueue {
  epfd: OwnedFd,
  pidfd: Option<OwnedFd>,
}

impl EventQueue {
  pub(crate) fn new() -> io::Result<Self> {
    // SAFETY: epoll_create1 has no preconditions, returns -1 on error
    let epfd = owned_fd(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
    Ok(Self { epfd, pidfd: None })
  }

  /// One-shot: the interest is disarmed after it fires.
  pub(crate) fn watch_exit(&mut self, pid: i32) -> io::Result<()> {
    // SAFETY: pidfd_open takes a pid and flags, returns a new fd or -1
    let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    let pidfd = owned_fd(ret as libc::c_int)?;
    self.register(
      pidfd.as_raw_fd(),
      (libc::EPOLLIN | libc::EPOLLONESHOT) as u32,
      EXIT_TOKEN,
    )?;
    self.pidfd = Some(pidfd);
    Ok(())
  }

  /// Level triggered: fires for as long as there's unread data.
  pub(crate) fn watch_readable(&mut self, fd: RawFd) -> io::Result<()> {
    self.register(fd, libc::EPOLLIN as u32, READ_TOKEN)
  }

  fn register(&mut self, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
    let mut event = libc::epoll_event { events, u64: token };
    // SAFETY: epfd is a valid epoll fd and event outlives the call
    let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) };
    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }

  pub(crate) fn wait(&self, timeout: Duration) -> io::Result<Wakeup> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; 2];

    // SAFETY: epfd is a valid epoll fd, events has room for events.len() entries
    let n = unsafe {
      libc::epoll_wait(
        self.epfd.as_raw_fd(),
        events.as_mut_ptr(),
        events.len() as libc::c_int,
        timeout_ms,
      )
    };
    if n < 0 {
      return Err(io::Error::last_os_error());
    }

    let fired = |token: u64| {
      events[..n as usize].iter().any(|ev| {
        let fired_token = ev.u64;
        fired_token == token
      })
    };
    // a shutdown request wins over a simultaneous exit so the owner isn't asked to stop twice
    if fired(READ_TOKEN) {
      Ok(Wakeup::Readable)
    } else if fired(EXIT_TOKEN) {
      Ok(Wakeup::ProcessExited)
    } else {
      Ok(Wakeup::TimedOut)
    }
  }
}
