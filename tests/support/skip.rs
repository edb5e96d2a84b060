//! Shared skip heuristics for server-backed integration tests.
//!
//! Failures caused by the host rather than the library (no network, root
//! user, download throttling) turn into a logged skip instead of a failed
//! assertion.

/// Canonical prefix for soft skip messages.
const SKIP_PREFIX: &str = "SKIP-PGEMBED";

/// Message substrings that signal an external failure which should skip tests
/// gracefully.
const DEFAULT_SKIP_CONDITIONS: &[(&str, &str)] = &[
    (
        "rate limit exceeded",
        "rate limit exceeded whilst downloading PostgreSQL",
    ),
    (
        "error sending request",
        "PostgreSQL binaries could not be downloaded",
    ),
    (
        "dns error",
        "PostgreSQL binaries could not be downloaded",
    ),
    (
        "provisioning timed out",
        "PostgreSQL binaries could not be downloaded in time",
    ),
    (
        "cannot be started by the root user",
        "the server refuses to run as root",
    ),
];

/// Formats a skip message when any known condition appears in `message` or
/// `debug`.
pub(crate) fn skip_message(message: &str, debug: Option<&str>) -> Option<String> {
    DEFAULT_SKIP_CONDITIONS
        .iter()
        .find(|(needle, _)| {
            message.contains(needle) || debug.is_some_and(|dbg| dbg.contains(needle))
        })
        .map(|(_, reason)| format!("{SKIP_PREFIX}: {reason}: {message}"))
}
