//! Starts real servers for integration tests, skipping on host limitations.

use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::eyre::{Report, Result};
use pgembed::{EmbeddedConfig, EmbeddedPostgres};

use crate::skip::skip_message;

/// Release exercised by the server-backed suites.
pub const TEST_VERSION: &str = "16.4.0";

/// Binary cache shared by every suite so binaries download at most once.
pub fn shared_cache_dir() -> Utf8PathBuf {
    std::env::var("PGEMBED_BINARY_CACHE_DIR").map_or_else(
        |_| {
            let tmp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
                .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
            tmp.join("pgembed-test-binaries")
        },
        Utf8PathBuf::from,
    )
}

/// Baseline configuration for tests; callers layer their overrides on top.
pub fn test_config() -> EmbeddedConfig {
    EmbeddedConfig::new(TEST_VERSION)
        .with_binary_cache_dir(shared_cache_dir())
        .with_startup_timeout(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_secs(10))
}

/// Starts an instance, returning `None` when the host cannot run one.
pub fn start_or_skip(config: EmbeddedConfig) -> Result<Option<EmbeddedPostgres>> {
    match EmbeddedPostgres::new(config) {
        Ok(pg) => Ok(Some(pg)),
        Err(err) => {
            let message = err.to_string();
            let debug = format!("{err:?}");
            if let Some(reason) = skip_message(&message, Some(&debug)) {
                tracing::warn!("{reason}");
                return Ok(None);
            }
            Err(Report::new(err))
        }
    }
}
