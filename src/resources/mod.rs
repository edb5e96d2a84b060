//! Directory, port, and lock allocation for one instance.

mod data_dir_lock;

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, eyre};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{ErrorKind, PgEmbedError, ReportExt, Result};
use crate::fs::{PRIVATE_DIR_MODE, ensure_private_dir, set_permissions, utf8_path};
use crate::observability::LOG_TARGET;

pub(crate) use data_dir_lock::DataDirLock;

/// A directory used by an instance: either caller-owned or an ephemeral
/// temporary directory removed when released.
#[derive(Debug)]
pub(crate) enum ResolvedDir {
    /// Supplied by the caller; left in place on release.
    Persistent(Utf8PathBuf),
    /// Created by the allocator; deleted on release.
    Ephemeral {
        /// Absolute path of the temporary directory.
        path: Utf8PathBuf,
        /// Guard that deletes the directory when dropped.
        guard: TempDir,
    },
}

impl ResolvedDir {
    pub(crate) fn path(&self) -> &Utf8Path {
        match self {
            Self::Persistent(path) | Self::Ephemeral { path, .. } => path,
        }
    }

    /// Removes ephemeral directories; persistent ones are kept.
    pub(crate) fn release(self) {
        if let Self::Ephemeral { path, guard } = self {
            if let Err(err) = guard.close() {
                warn!(
                    target: LOG_TARGET,
                    path = %path,
                    error = %err,
                    "failed to remove ephemeral directory"
                );
            }
        }
    }
}

/// Makes `requested` absolute and creates it, or allocates an ephemeral
/// directory when nothing was requested.
pub(crate) fn resolve_directory(requested: Option<&Utf8Path>, label: &str) -> Result<ResolvedDir> {
    match requested.filter(|path| !path.as_str().trim().is_empty()) {
        Some(path) => {
            let absolute = absolutise(path)
                .with_context(|| format!("resolve {label} directory {path}"))
                .with_kind(ErrorKind::ResourceError)?;
            ensure_private_dir(&absolute)
                .with_context(|| format!("create {label} directory"))
                .with_kind(ErrorKind::ResourceError)?;
            debug!(target: LOG_TARGET, label, path = %absolute, "using directory");
            Ok(ResolvedDir::Persistent(absolute))
        }
        None => ephemeral_directory(label),
    }
}

fn ephemeral_directory(label: &str) -> Result<ResolvedDir> {
    let guard = tempfile::Builder::new()
        .prefix(&format!("pgembed-{label}-"))
        .tempdir()
        .map_err(|err| eyre!(err).wrap_err(format!("create ephemeral {label} directory")))
        .with_kind(ErrorKind::ResourceError)?;
    let path = utf8_path(guard.path()).with_kind(ErrorKind::ResourceError)?;
    set_permissions(&path, PRIVATE_DIR_MODE).with_kind(ErrorKind::ResourceError)?;
    debug!(target: LOG_TARGET, label, path = %path, "created ephemeral directory");
    Ok(ResolvedDir::Ephemeral { path, guard })
}

fn absolutise(path: &Utf8Path) -> color_eyre::Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("read current working directory")?;
    Ok(utf8_path(&cwd)?.join(path))
}

/// Returns `requested` unchanged, or a free loopback port when it is zero.
///
/// The probe listener is released before the server binds, so another
/// process may claim the port in between; startup then fails rather than
/// retrying.
pub(crate) fn allocate_port(requested: u16) -> Result<u16> {
    if requested != 0 {
        return Ok(requested);
    }
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .map_err(|err| {
            PgEmbedError::new(
                ErrorKind::ResourceError,
                eyre!(err).wrap_err("bind 127.0.0.1:0 to allocate a port"),
            )
        })?;
    let port = listener
        .local_addr()
        .map_err(|err| {
            PgEmbedError::new(
                ErrorKind::ResourceError,
                eyre!(err).wrap_err("read allocated port"),
            )
        })?
        .port();
    drop(listener);
    debug!(target: LOG_TARGET, port, "allocated ephemeral port");
    Ok(port)
}

/// Everything an instance holds while it runs.
#[derive(Debug)]
pub(crate) struct RuntimeResources {
    data_dir: ResolvedDir,
    runtime_dir: ResolvedDir,
    port: u16,
    data_lock: DataDirLock,
}

impl RuntimeResources {
    /// Resolves both directories, locks the data directory, and picks a port.
    ///
    /// Anything allocated before a failure is released on return.
    pub(crate) fn allocate(
        data_dir: Option<&Utf8Path>,
        runtime_dir: Option<&Utf8Path>,
        port: u16,
    ) -> Result<Self> {
        let data = resolve_directory(data_dir, "data")?;
        let data_lock = match DataDirLock::acquire(data.path()) {
            Ok(lock) => lock,
            Err(err) => {
                data.release();
                return Err(err);
            }
        };
        let runtime = match resolve_directory(runtime_dir, "runtime") {
            Ok(dir) => dir,
            Err(err) => {
                drop(data_lock);
                data.release();
                return Err(err);
            }
        };
        match allocate_port(port) {
            Ok(bound) => Ok(Self {
                data_dir: data,
                runtime_dir: runtime,
                port: bound,
                data_lock,
            }),
            Err(err) => {
                drop(data_lock);
                runtime.release();
                data.release();
                Err(err)
            }
        }
    }

    pub(crate) fn data_dir(&self) -> &Utf8Path {
        self.data_lock.path()
    }

    pub(crate) fn runtime_dir(&self) -> &Utf8Path {
        self.runtime_dir.path()
    }

    pub(crate) const fn port(&self) -> u16 {
        self.port
    }

    /// Drops the data-directory lock and deletes ephemeral directories.
    pub(crate) fn release(self) {
        let Self {
            data_dir,
            runtime_dir,
            data_lock,
            ..
        } = self;
        drop(data_lock);
        runtime_dir.release();
        data_dir.release();
    }
}
