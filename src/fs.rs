//! Capability-scoped filesystem helpers used by the resource allocator and cache.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::Dir};
use color_eyre::eyre::{Context, Result};
use std::io::ErrorKind;

/// Owner-only mode applied to every directory the crate creates.
pub(crate) const PRIVATE_DIR_MODE: u32 = 0o700;

/// Splits a path into an ambient directory handle and the remaining relative
/// component. Absolute paths open `/`; relative paths open the working
/// directory.
pub(crate) fn ambient_dir_and_path(path: &Utf8Path) -> Result<(Dir, Utf8PathBuf)> {
    if path.has_root() {
        let stripped = path
            .strip_prefix("/")
            .map_or_else(|_| path.to_path_buf(), Utf8Path::to_path_buf);
        let dir = Dir::open_ambient_dir("/", ambient_authority())
            .context("open ambient root directory")?;
        Ok((dir, stripped))
    } else {
        let dir = Dir::open_ambient_dir(".", ambient_authority())
            .context("open ambient working directory")?;
        Ok((dir, path.to_path_buf()))
    }
}

/// Creates `path` and any missing parents. Existing directories are left alone.
pub(crate) fn ensure_dir_exists(path: &Utf8Path) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    dir.create_dir_all(relative.as_std_path())
        .or_else(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                Ok(())
            } else {
                Err(err)
            }
        })
        .with_context(|| format!("create {path}"))
}

/// Applies a POSIX mode to an existing path.
#[cfg(unix)]
pub(crate) fn set_permissions(path: &Utf8Path, mode: u32) -> Result<()> {
    use cap_std::fs::{Permissions, PermissionsExt};

    let (dir, relative) = ambient_dir_and_path(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    dir.set_permissions(relative.as_std_path(), Permissions::from_mode(mode))
        .with_context(|| format!("chmod {path}"))
}

/// Permissions are not managed on non-Unix platforms.
#[cfg(not(unix))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "signature matches the Unix implementation"
)]
pub(crate) fn set_permissions(_path: &Utf8Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Creates `path` if needed and restricts it to its owner.
pub(crate) fn ensure_private_dir(path: &Utf8Path) -> Result<()> {
    let existed = path.is_dir();
    ensure_dir_exists(path)?;
    if !existed {
        set_permissions(path, PRIVATE_DIR_MODE)?;
    }
    Ok(())
}

/// Converts an arbitrary [`std::path::Path`] into a UTF-8 path.
pub(crate) fn utf8_path(path: &std::path::Path) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|raw| color_eyre::eyre::eyre!("path is not valid UTF-8: {}", raw.display()))
}
