use std::io;

/// Whether `pid` names a process that currently exists.
///
/// A process we aren't allowed to signal still exists. Zombies count as alive until reaped.
pub fn process_exists(pid: i32) -> bool {
  // kill(0, ..) and kill(-n, ..) address process groups, not a process
  if pid <= 0 {
    return false;
  }

  // SAFETY: signal 0 performs the permission and existence checks without delivering anything
  let ret = unsafe { libc::kill(pid, 0) };
  ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
