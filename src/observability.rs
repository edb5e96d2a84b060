//! Shared tracing configuration for observability instrumentation.
//!
//! Centralises the log targets used by the crate so subscribers can filter
//! lifecycle events without pulling in unrelated application logs.

/// Target used by lifecycle spans and logs.
pub(crate) const LOG_TARGET: &str = "pgembed::lifecycle";

/// Target used by binary cache operations.
pub(crate) const CACHE_LOG_TARGET: &str = "pgembed::cache";
