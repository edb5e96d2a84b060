//! Shared on-disk cache of `PostgreSQL` binary sets.
//!
//! Entries are keyed by platform and exact version:
//!
//! ```text
//! <cache_root>/
//!   .locks/<platform>-<version>.lock
//!   <platform>/<version>/
//!     .complete
//!     bin/
//!     lib/ share/ ...
//! ```
//!
//! An entry is only visible to readers once its completion marker exists and
//! it has been renamed into place, so readers never take a lock.

mod config;
mod entry;
mod lock;

pub(crate) use config::resolve_cache_dir;
pub(crate) use entry::{COMPLETION_MARKER, check_cache, publish_entry};
pub(crate) use lock::CacheLock;

/// Returns the `<arch>-<os>` component used to separate entries by platform.
pub(crate) fn platform_key() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// Returns the lock key for one version on the current platform.
pub(crate) fn lock_key(version: &str) -> String {
    format!("{}-{version}", platform_key())
}
