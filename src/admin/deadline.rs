//! Optional deadlines for administrative calls.

use std::time::{Duration, Instant};

/// Bounds how long an administrative call may take end to end.
///
/// The remaining time at the moment of the call caps both the connect
/// timeout and the server-side `statement_timeout`.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use pgembed::AdminDeadline;
///
/// let deadline = AdminDeadline::after(Duration::from_secs(5));
/// assert!(!deadline.is_expired());
/// assert!(!AdminDeadline::none().is_expired());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdminDeadline {
    at: Option<Instant>,
}

impl AdminDeadline {
    /// No deadline; calls wait as long as the server takes.
    #[must_use]
    pub const fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// A deadline at a fixed instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// Reports whether the deadline has already passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline, `Some(ZERO)` once expired, `None`
    /// without a deadline.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}
