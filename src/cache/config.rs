//! Resolution of the shared binary cache root.
//!
//! Falls back through an explicit override, the environment, and XDG
//! conventions before settling on the system temporary directory.

use camino::{Utf8Path, Utf8PathBuf};
use std::path::PathBuf;

/// Environment variable that overrides the cache root.
pub(crate) const CACHE_DIR_ENV: &str = "PGEMBED_BINARY_CACHE_DIR";

/// Subdirectory path within the XDG cache home.
const CACHE_SUBDIR: &str = "pgembed/binaries";

/// Resolves the binary cache directory.
///
/// The resolution order is:
///
/// 1. `explicit`, when the caller configured one
/// 2. `PGEMBED_BINARY_CACHE_DIR` if set and valid UTF-8
/// 3. `$XDG_CACHE_HOME/pgembed/binaries` if `XDG_CACHE_HOME` is set
/// 4. `~/.cache/pgembed/binaries`
/// 5. `<tmp>/pgembed/binaries` as last resort
pub(crate) fn resolve_cache_dir(explicit: Option<&Utf8Path>) -> Utf8PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }

    resolve_from_env()
        .or_else(resolve_from_xdg_cache)
        .or_else(resolve_from_home)
        .unwrap_or_else(resolve_from_temp)
}

fn non_empty_var(name: &str) -> Option<Utf8PathBuf> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Utf8PathBuf::from_path_buf(PathBuf::from(trimmed)).ok()
}

fn resolve_from_env() -> Option<Utf8PathBuf> {
    non_empty_var(CACHE_DIR_ENV)
}

fn resolve_from_xdg_cache() -> Option<Utf8PathBuf> {
    non_empty_var("XDG_CACHE_HOME").map(|path| path.join(CACHE_SUBDIR))
}

fn resolve_from_home() -> Option<Utf8PathBuf> {
    let home = dirs::home_dir()?;
    let path = Utf8PathBuf::from_path_buf(home).ok()?;
    Some(path.join(".cache").join(CACHE_SUBDIR))
}

fn resolve_from_temp() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
        .join(CACHE_SUBDIR)
}
