//! Kernel plumbing for the exit watcher: a self-pipe and an event queue that can wait on
//! "process exited" and "descriptor readable" at the same time.

use std::{
  io,
  os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use tracing::trace;

use crate::Error;

#[cfg(target_os = "macos")]
mod kqueue;
#[cfg(target_os = "macos")]
pub(crate) use kqueue::EventQueue;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub(crate) use epoll::EventQueue;

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
compile_error!("nodoze needs kqueue (macOS) or epoll + pidfd (Linux)");

/// What woke a wait on the [`EventQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wakeup {
  ProcessExited,
  Readable,
  TimedOut,
}

/// One-way pipe used to interrupt a blocked wait from another thread.
#[derive(Debug)]
pub(crate) struct Pipe {
  read: OwnedFd,
  write: OwnedFd,
}

impl Pipe {
  pub(crate) fn new() -> Result<Self, Error> {
    let mut fds: [libc::c_int; 2] = [-1; 2];
    // SAFETY: fds is a valid 2-element array, pipe() writes exactly 2 fds
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
      return Err(Error::PipeCreation(io::Error::last_os_error()));
    }
    // SAFETY: both fds were just returned by pipe() and nothing else owns them
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    // the writer must never block, a full pipe already means "wake up"
    add_flags(write.as_raw_fd(), libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
      .map_err(Error::DescriptorConfiguration)?;
    for fd in [&read, &write] {
      add_flags(fd.as_raw_fd(), libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)
        .map_err(Error::DescriptorConfiguration)?;
    }

    Ok(Self { read, write })
  }

  pub(crate) fn read_fd(&self) -> RawFd {
    self.read.as_raw_fd()
  }

  /// Make the read end readable. Best effort: a full pipe is already readable.
  pub(crate) fn notify(&self) {
    let byte = 1u8;
    // SAFETY: the write end is owned by self and byte is a valid 1-byte buffer
    let ret = unsafe { libc::write(self.write.as_raw_fd(), (&byte as *const u8).cast(), 1) };
    if ret < 0 {
      trace!("pipe notify failed: {}", io::Error::last_os_error());
    }
  }
}

fn add_flags(fd: RawFd, get: libc::c_int, set: libc::c_int, flag: libc::c_int) -> io::Result<()> {
  // SAFETY: fcntl get/set on an fd we own has no memory safety requirements
  let flags = unsafe { libc::fcntl(fd, get) };
  if flags < 0 {
    return Err(io::Error::last_os_error());
  }
  // SAFETY: as above
  if unsafe { libc::fcntl(fd, set, flags | flag) } < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// Wrap the return value of a call that hands out a new fd.
fn owned_fd(fd: libc::c_int) -> io::Result<OwnedFd> {
  if fd < 0 {
    Err(io::Error::last_os_error())
  } else {
    // SAFETY: fd is a freshly created descriptor with no other owner
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
  }
}

#[cfg(test)]
mod tests {
  use std::{process::Command, time::Duration};

  use super::*;

  #[test]
  fn pipe_write_end_is_non_blocking() {
    let pipe = Pipe::new().unwrap();
    // fill it well past the kernel buffer, notify must keep returning
    for _ in 0..200_000 {
      pipe.notify();
    }
  }

  #[test]
  fn queue_times_out_with_nothing_ready() {
    let pipe = Pipe::new().unwrap();
    let mut queue = EventQueue::new().unwrap();
    queue.watch_readable(pipe.read_fd()).unwrap();
    let wakeup = queue.wait(Duration::from_millis(20)).unwrap();
    assert_eq!(wakeup, Wakeup::TimedOut);
  }

  #[test]
  fn queue_reports_readable_pipe() {
    let pipe = Pipe::new().unwrap();
    let mut queue = EventQueue::new().unwrap();
    queue.watch_readable(pipe.read_fd()).unwrap();
    pipe.notify();
    let wakeup = queue.wait(Duration::from_secs(1)).unwrap();
    assert_eq!(wakeup, Wakeup::Readable);
  }

  #[test]
  fn queue_reports_process_exit() {
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let mut queue = EventQueue::new().unwrap();
    queue.watch_exit(child.id() as i32).unwrap();
    assert_eq!(
      queue.wait(Duration::from_millis(20)).unwrap(),
      Wakeup::TimedOut
    );

    child.kill().unwrap();
    let wakeup = queue.wait(Duration::from_secs(5)).unwrap();
    child.wait().unwrap();
    assert_eq!(wakeup, Wakeup::ProcessExited);
  }

  #[test]
  fn watching_missing_process_fails_with_esrch() {
    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id() as i32;
    child.kill().unwrap();
    child.wait().unwrap();

    let mut queue = EventQueue::new().unwrap();
    let err = queue.watch_exit(pid).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
  }
}
