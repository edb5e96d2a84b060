//! Signal escalation used to stop the server process.
//!
//! `SIGINT` requests a fast shutdown, `SIGQUIT` an immediate one, and `SIGKILL`
//! is the last resort. Each stage waits on the child so the process is reaped
//! before the next signal is considered.

use std::fmt::Display;
use std::process::Child;
use std::time::Duration;

use color_eyre::eyre::{Result, eyre};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::observability::LOG_TARGET;

/// Grace period after `SIGQUIT` before resorting to `SIGKILL`.
pub(super) const IMMEDIATE_SHUTDOWN_WINDOW: Duration = Duration::from_secs(5);

/// Grace period for the kernel to deliver `SIGKILL` and let us reap the child.
const KILL_CONFIRM_WINDOW: Duration = Duration::from_secs(5);

/// How the process came to be gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ShutdownOutcome {
    /// The process had already exited before any signal was sent.
    AlreadyExited,
    /// Exited after the fast-shutdown request.
    Graceful,
    /// Exited after the immediate-shutdown request.
    Immediate,
    /// Had to be killed.
    Killed,
}

/// Stops `child`, escalating when it ignores earlier requests.
///
/// Returns an error only when a signal could not be delivered to a process
/// that still exists or the final kill could not be confirmed.
#[cfg(unix)]
pub(super) fn terminate(child: &mut Child, graceful_timeout: Duration) -> Result<ShutdownOutcome> {
    use nix::sys::signal::Signal;

    if reaped(child)? {
        return Ok(ShutdownOutcome::AlreadyExited);
    }

    let pid = child.id();
    if !send_signal(child, Signal::SIGINT)? || wait_for_exit(child, graceful_timeout)? {
        debug!(target: LOG_TARGET, pid, "server stopped after fast shutdown");
        return Ok(ShutdownOutcome::Graceful);
    }

    warn_escalation(pid, "SIGQUIT", graceful_timeout);
    if !send_signal(child, Signal::SIGQUIT)? || wait_for_exit(child, IMMEDIATE_SHUTDOWN_WINDOW)? {
        return Ok(ShutdownOutcome::Immediate);
    }

    warn_escalation(pid, "SIGKILL", IMMEDIATE_SHUTDOWN_WINDOW);
    if !send_signal(child, Signal::SIGKILL)? || wait_for_exit(child, KILL_CONFIRM_WINDOW)? {
        return Ok(ShutdownOutcome::Killed);
    }

    Err(eyre!(
        "server process {pid} survived SIGKILL for {}s",
        KILL_CONFIRM_WINDOW.as_secs()
    ))
}

/// Non-Unix platforms have no graceful signal; the child is killed outright.
#[cfg(not(unix))]
pub(super) fn terminate(child: &mut Child, _graceful_timeout: Duration) -> Result<ShutdownOutcome> {
    if reaped(child)? {
        return Ok(ShutdownOutcome::AlreadyExited);
    }
    match child.kill() {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
        Err(err) => return Err(eyre!("failed to kill server process {}: {err}", child.id())),
    }
    child
        .wait()
        .map_err(|err| eyre!("failed to reap server process {}: {err}", child.id()))?;
    Ok(ShutdownOutcome::Killed)
}

fn reaped(child: &mut Child) -> Result<bool> {
    child
        .try_wait()
        .map(|status| status.is_some())
        .map_err(|err| eyre!("failed to poll server process {}: {err}", child.id()))
}

/// Delivers `signal`. Returns `false` when the process no longer exists.
#[cfg(unix)]
fn send_signal(child: &mut Child, signal: nix::sys::signal::Signal) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(child.id())
        .map_err(|err| eyre!("process id {} out of range: {err}", child.id()))?;
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => {
            drop(child.try_wait());
            Ok(false)
        }
        Err(errno) => {
            // The pid is ours until reaped, so delivery only fails while it
            // still exists.
            if reaped(child)? {
                Ok(false)
            } else {
                Err(eyre!("failed to send {signal} to server process {raw}: {errno}"))
            }
        }
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<bool> {
    child
        .wait_timeout(timeout)
        .map(|status| status.is_some())
        .map_err(|err| eyre!("failed to wait for server process {}: {err}", child.id()))
}

fn warn_escalation(pid: u32, next: &str, waited: Duration) {
    warn!(
        target: LOG_TARGET,
        pid,
        "server process {pid} still running after {}s; escalating to {next}",
        waited.as_secs()
    );
}

/// Logs a failed stop on the drop path, where errors cannot propagate.
pub(crate) fn warn_stop_failure(context: &str, err: &impl Display) {
    warn!(
        target: LOG_TARGET,
        "failed to stop embedded postgres instance ({context}): {err}"
    );
}
