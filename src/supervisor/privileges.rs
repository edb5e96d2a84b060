//! Guards against launching the server as root.

use color_eyre::eyre::eyre;

use crate::error::{ErrorKind, PgEmbedError, Result};

/// Fails when the effective user is root; `postgres` refuses to run there.
#[cfg(unix)]
pub(super) fn ensure_not_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        return Err(PgEmbedError::new(
            ErrorKind::LaunchFailed,
            eyre!("PostgreSQL cannot be started by the root user; run as an unprivileged user"),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "signature matches the Unix implementation"
)]
pub(super) fn ensure_not_root() -> Result<()> {
    Ok(())
}
