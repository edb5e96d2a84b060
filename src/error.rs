//! Domain error types for the embedded `PostgreSQL` lifecycle engine.

use color_eyre::Report;
use thiserror::Error;

/// Result alias for operations that may return a [`PgEmbedError`].
pub type Result<T> = std::result::Result<T, PgEmbedError>;

/// Categorises lifecycle failures so callers can branch on structured errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    /// The requested version string is empty, malformed, or names no known release.
    InvalidVersion,
    /// Binaries had to be fetched or installed and that failed.
    ProvisioningFailed,
    /// A data or runtime directory could not be resolved, created, or locked,
    /// or no port could be allocated.
    ResourceError,
    /// `initdb` or the server executable could not be run, or the server exited
    /// before it became ready.
    LaunchFailed,
    /// The server did not accept connections within the startup timeout.
    StartupTimeout,
    /// Termination of the server process could not be confirmed.
    ShutdownFailed,
    /// The instance is not in the running state.
    NotRunning,
    /// A database name argument was empty.
    EmptyName,
    /// The server rejected an administrative statement or could not be reached.
    AdminOperationFailed,
    /// The instance was started twice, or started after it was stopped.
    InvalidState,
}

impl ErrorKind {
    /// Returns a stable, human-readable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidVersion => "invalid version",
            Self::ProvisioningFailed => "provisioning failed",
            Self::ResourceError => "resource error",
            Self::LaunchFailed => "launch failed",
            Self::StartupTimeout => "startup timeout",
            Self::ShutdownFailed => "shutdown failed",
            Self::NotRunning => "not running",
            Self::EmptyName => "empty name",
            Self::AdminOperationFailed => "admin operation failed",
            Self::InvalidState => "invalid state",
        }
    }
}

/// Error surfaced by every fallible operation in the crate.
///
/// Pairs an [`ErrorKind`] with a diagnostic report. Server-reported text from
/// administrative statements is preserved separately so callers can inspect it
/// without parsing the rendered message.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct PgEmbedError {
    kind: ErrorKind,
    #[source]
    report: Report,
    server_message: Option<String>,
}

impl PgEmbedError {
    /// Constructs a new error with the provided kind and diagnostic report.
    #[must_use]
    pub const fn new(kind: ErrorKind, report: Report) -> Self {
        Self {
            kind,
            report,
            server_message: None,
        }
    }

    /// Attaches the raw message reported by the `PostgreSQL` server.
    #[must_use]
    pub fn with_server_message(mut self, message: impl Into<String>) -> Self {
        self.server_message = Some(message.into());
        self
    }

    /// Returns the semantic category for this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message reported by the server, when one was available.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        self.server_message.as_deref()
    }

    /// Extracts the underlying diagnostic report.
    pub fn into_report(self) -> Report {
        self.report
    }

    pub(crate) fn not_running(operation: &str) -> Self {
        Self::new(
            ErrorKind::NotRunning,
            color_eyre::eyre::eyre!("cannot {operation}: instance is not running or has been stopped"),
        )
    }

    pub(crate) fn empty_name(operation: &str) -> Self {
        Self::new(
            ErrorKind::EmptyName,
            color_eyre::eyre::eyre!("cannot {operation}: database name must not be empty"),
        )
    }
}

/// Shorthand used internally to tag an eyre report with a kind.
pub(crate) trait ReportExt<T> {
    fn with_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<T> ReportExt<T> for std::result::Result<T, Report> {
    fn with_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|report| PgEmbedError::new(kind, report))
    }
}
