//! Connection details exposed to callers that build their own clients.
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

/// Snapshot of how to reach a running instance.
///
/// # Examples
/// ```no_run
/// use pgembed::{EmbeddedConfig, EmbeddedPostgres};
///
/// # fn main() -> pgembed::Result<()> {
/// let pg = EmbeddedPostgres::new(EmbeddedConfig::new("16.4.0"))?;
/// let metadata = pg.metadata()?;
/// assert_eq!(metadata.host(), "127.0.0.1");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionMetadata {
    pub(crate) port: u16,
    pub(crate) superuser: String,
    pub(crate) password: Option<String>,
    pub(crate) data_dir: Utf8PathBuf,
    pub(crate) runtime_dir: Utf8PathBuf,
    pub(crate) version: String,
    pub(crate) log_file: Utf8PathBuf,
}

impl ConnectionMetadata {
    /// Returns the loopback address the server listens on.
    #[must_use]
    pub const fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    /// Returns the bound port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the superuser name.
    #[must_use]
    pub fn superuser(&self) -> &str {
        &self.superuser
    }

    /// Returns the superuser password, when one is configured.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the absolute data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    /// Returns the absolute runtime (socket) directory.
    #[must_use]
    pub fn runtime_dir(&self) -> &Utf8Path {
        &self.runtime_dir
    }

    /// Returns the exact server version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the server log file.
    #[must_use]
    pub fn log_file(&self) -> &Utf8Path {
        &self.log_file
    }
}

impl fmt::Debug for ConnectionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMetadata")
            .field("port", &self.port)
            .field("superuser", &self.superuser)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("data_dir", &self.data_dir)
            .field("runtime_dir", &self.runtime_dir)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
