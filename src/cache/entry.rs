//! Lookup and publication of individual cache entries.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::debug;

use super::platform_key;
use crate::observability::CACHE_LOG_TARGET;

/// Marker file name indicating a complete cache entry.
pub(crate) const COMPLETION_MARKER: &str = ".complete";

/// Contents of the completion marker.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct EntryManifest {
    version: String,
    platform: String,
}

fn entry_dir(cache_root: &Utf8Path, version: &str) -> Utf8PathBuf {
    cache_root.join(platform_key()).join(version)
}

fn is_entry_complete(version_dir: &Utf8Path) -> bool {
    version_dir.join(COMPLETION_MARKER).is_file() && version_dir.join("bin").is_dir()
}

/// Returns the cache entry for `version` when it is complete.
pub(crate) fn check_cache(cache_root: &Utf8Path, version: &str) -> Option<Utf8PathBuf> {
    let version_dir = entry_dir(cache_root, version);
    if is_entry_complete(&version_dir) {
        debug!(
            target: CACHE_LOG_TARGET,
            version = %version,
            path = %version_dir,
            "cache hit"
        );
        Some(version_dir)
    } else {
        debug!(
            target: CACHE_LOG_TARGET,
            version = %version,
            marker_exists = version_dir.join(COMPLETION_MARKER).exists(),
            bin_exists = version_dir.join("bin").is_dir(),
            "cache miss"
        );
        None
    }
}

/// Moves a freshly installed binary set into the cache.
///
/// The marker is written inside `installed` before the rename, so the entry
/// becomes visible atomically. Callers must hold the version's [`CacheLock`].
///
/// [`CacheLock`]: super::CacheLock
pub(crate) fn publish_entry(
    cache_root: &Utf8Path,
    version: &str,
    installed: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let version_dir = entry_dir(cache_root, version);
    debug!(
        target: CACHE_LOG_TARGET,
        source = %installed,
        version = %version,
        path = %version_dir,
        "populating cache"
    );

    write_completion_marker(installed, version)?;

    if let Some(parent) = version_dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory: {parent}"))?;
    }
    if version_dir.exists() {
        // Left behind by an interrupted populate; the lock guarantees no reader
        // treats it as complete.
        fs::remove_dir_all(&version_dir)
            .with_context(|| format!("failed to remove stale cache entry: {version_dir}"))?;
    }
    fs::rename(installed, &version_dir)
        .with_context(|| format!("failed to move binaries into cache: {version_dir}"))?;

    debug!(
        target: CACHE_LOG_TARGET,
        version = %version,
        path = %version_dir,
        "cache population completed"
    );
    Ok(version_dir)
}

fn write_completion_marker(dir: &Utf8Path, version: &str) -> Result<()> {
    let marker = dir.join(COMPLETION_MARKER);
    let manifest = EntryManifest {
        version: version.to_owned(),
        platform: platform_key(),
    };
    let body = serde_json::to_vec_pretty(&manifest).context("serialise cache manifest")?;
    fs::write(&marker, body)
        .with_context(|| format!("failed to write cache completion marker: {marker}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 tempdir");
        (temp, path)
    }

    fn fake_install(root: &Utf8Path) -> Utf8PathBuf {
        let installed = root.join("staging/16.4.0");
        fs::create_dir_all(installed.join("bin")).expect("create bin");
        fs::write(installed.join("bin/postgres"), b"").expect("write postgres");
        installed
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let (_temp, root) = utf8_tempdir();
        assert!(check_cache(&root, "16.4.0").is_none());
    }

    #[test]
    fn entry_without_marker_is_a_miss() {
        let (_temp, root) = utf8_tempdir();
        fs::create_dir_all(entry_dir(&root, "16.4.0").join("bin")).expect("create bin");
        assert!(check_cache(&root, "16.4.0").is_none());
    }

    #[test]
    fn published_entry_is_a_hit_with_manifest() {
        let (_temp, root) = utf8_tempdir();
        let installed = fake_install(&root);

        let published = publish_entry(&root, "16.4.0", &installed).expect("publish");

        assert_eq!(check_cache(&root, "16.4.0"), Some(published.clone()));
        assert!(!installed.exists(), "staging dir should be moved");
        let raw = fs::read(published.join(COMPLETION_MARKER)).expect("read marker");
        let manifest: EntryManifest = serde_json::from_slice(&raw).expect("parse manifest");
        assert_eq!(manifest.version, "16.4.0");
        assert_eq!(manifest.platform, platform_key());
    }

    #[test]
    fn publish_replaces_incomplete_entry() {
        let (_temp, root) = utf8_tempdir();
        let stale = entry_dir(&root, "16.4.0");
        fs::create_dir_all(stale.join("partial")).expect("create stale");
        let installed = fake_install(&root);

        let published = publish_entry(&root, "16.4.0", &installed).expect("publish");

        assert!(!published.join("partial").exists());
        assert!(published.join("bin/postgres").is_file());
    }
}
