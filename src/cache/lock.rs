//! Cross-process file locking for cache coordination.
//!
//! Serialises population of a cache entry across processes that share the
//! cache root. Lock files live under `<cache_root>/.locks/`.

use camino::Utf8Path;
use std::fs::{File, OpenOptions};
use std::io;

use crate::lock::{LockMode, lock_exclusive};

/// Subdirectory within the cache for lock files.
pub(crate) const LOCKS_SUBDIR: &str = ".locks";

/// Guard that holds an exclusive cache lock until dropped.
#[derive(Debug)]
pub(crate) struct CacheLock {
    _file: File,
}

impl CacheLock {
    /// Blocks until the exclusive lock for `key` is held.
    pub(crate) fn acquire_exclusive(cache_root: &Utf8Path, key: &str) -> io::Result<Self> {
        let locks_dir = cache_root.join(LOCKS_SUBDIR);
        std::fs::create_dir_all(&locks_dir)?;

        let lock_path = locks_dir.join(format!("{key}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        lock_exclusive(&file, LockMode::Blocking)?;
        Ok(Self { _file: file })
    }
}
