//! Lifecycle states of an embedded instance.

use std::fmt;

/// Where an [`EmbeddedPostgres`](crate::EmbeddedPostgres) is in its lifecycle.
///
/// Transitions only move forward:
/// `NotStarted → Starting → Running → Stopping → Stopped`. A failed start
/// goes straight to `Stopped`, and `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Created but never started.
    NotStarted,
    /// Resolving binaries, allocating resources, or waiting for readiness.
    Starting,
    /// Accepting administrative operations.
    Running,
    /// A stop was requested but the process is not yet confirmed gone.
    Stopping,
    /// Terminal; the process is gone and resources are released.
    Stopped,
}

impl InstanceState {
    /// Returns a stable lowercase label for logs and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Reports whether `start` is permitted from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::NotStarted)
    }

    /// Reports whether a server process may still be alive.
    #[must_use]
    pub const fn owns_process(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
