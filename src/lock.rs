//! Thin `flock(2)` wrapper shared by the cache and data-directory locks.
//!
//! Locks are advisory and tied to the open file description, so they are
//! released when the owning [`File`] is dropped or the process exits.

use std::fs::File;
use std::io;

/// How the lock call should behave when another holder exists.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum LockMode {
    /// Wait until the lock becomes available.
    Blocking,
    /// Fail with [`io::ErrorKind::WouldBlock`] instead of waiting.
    NonBlocking,
}

/// Takes an exclusive lock on `file`.
#[cfg(unix)]
pub(crate) fn lock_exclusive(file: &File, mode: LockMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let flags = match mode {
        LockMode::Blocking => libc::LOCK_EX,
        LockMode::NonBlocking => libc::LOCK_EX | libc::LOCK_NB,
    };

    // SAFETY: `file` is borrowed for the duration of the call, so the
    // descriptor returned by `as_raw_fd` stays open and valid while `flock`
    // runs.
    let result = unsafe { libc::flock(file.as_raw_fd(), flags) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Cross-process locking is unavailable off Unix; callers proceed unlocked.
#[cfg(not(unix))]
pub(crate) fn lock_exclusive(_file: &File, _mode: LockMode) -> io::Result<()> {
    Ok(())
}
