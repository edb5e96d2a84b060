//! Exclusive ownership of a data directory for the lifetime of an instance.

use std::fs::File;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use tracing::debug;

use crate::error::{ErrorKind, PgEmbedError, Result};
use crate::lock::{LockMode, lock_exclusive};
use crate::observability::LOG_TARGET;

/// Holds a non-blocking exclusive `flock` on the data directory itself.
///
/// The lock lives on the directory descriptor rather than a file inside it,
/// so `initdb` still sees an empty directory. Dropping the guard releases it.
#[derive(Debug)]
pub(crate) struct DataDirLock {
    path: Utf8PathBuf,
    _file: Option<File>,
}

impl DataDirLock {
    /// Claims `data_dir` or fails fast when another instance holds it.
    pub(crate) fn acquire(data_dir: &Utf8Path) -> Result<Self> {
        let file = open_directory(data_dir)?;
        if let Some(ref handle) = file {
            lock_exclusive(handle, LockMode::NonBlocking).map_err(|err| {
                if err.kind() == io::ErrorKind::WouldBlock {
                    PgEmbedError::new(
                        ErrorKind::ResourceError,
                        eyre!("data directory {data_dir} is already in use by another instance"),
                    )
                } else {
                    PgEmbedError::new(
                        ErrorKind::ResourceError,
                        eyre!(err).wrap_err(format!("lock data directory {data_dir}")),
                    )
                }
            })?;
        }
        debug!(target: LOG_TARGET, data_dir = %data_dir, "data directory locked");
        Ok(Self {
            path: data_dir.to_path_buf(),
            _file: file,
        })
    }

    /// Returns the locked directory.
    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_directory(data_dir: &Utf8Path) -> Result<Option<File>> {
    File::open(data_dir).map(Some).map_err(|err| {
        PgEmbedError::new(
            ErrorKind::ResourceError,
            eyre!(err).wrap_err(format!("open data directory {data_dir}")),
        )
    })
}

#[cfg(not(unix))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "signature matches the Unix implementation"
)]
fn open_directory(_data_dir: &Utf8Path) -> Result<Option<File>> {
    Ok(None)
}
