//! Maps a requested version to an installed binary set.
//!
//! Cache hits are served directly from the shared cache. Misses are
//! provisioned into a staging directory under the cache root and published
//! atomically, serialised per version both within the process and across
//! processes.

mod provisioner;

use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use dashmap::DashMap;
use postgresql_embedded::Version;
use tracing::{info, info_span};

use crate::cache::{self, CacheLock};
use crate::error::{ErrorKind, PgEmbedError, Result};
use crate::observability::CACHE_LOG_TARGET;

pub(crate) use provisioner::{BinaryProvisioner, PostgresqlEmbeddedProvisioner, ProvisionFailure};
#[cfg(test)]
pub(crate) use provisioner::MockBinaryProvisioner;

/// Per-version mutexes that serialise cache population within this process.
static POPULATE_LOCKS: OnceLock<DashMap<String, Mutex<()>>> = OnceLock::new();

fn populate_locks() -> &'static DashMap<String, Mutex<()>> {
    POPULATE_LOCKS.get_or_init(DashMap::new)
}

/// The executables and support files for one server version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySet {
    version: String,
    root: Utf8PathBuf,
}

impl BinarySet {
    /// Returns the exact version these binaries belong to.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the installation root (the cache entry directory).
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the directory holding the executables.
    #[must_use]
    pub fn bin_dir(&self) -> Utf8PathBuf {
        self.root.join("bin")
    }

    /// Returns the path of the `postgres` server executable.
    #[must_use]
    pub fn postgres(&self) -> Utf8PathBuf {
        self.executable("postgres")
    }

    /// Returns the path of the `initdb` executable.
    #[must_use]
    pub fn initdb(&self) -> Utf8PathBuf {
        self.executable("initdb")
    }

    #[cfg(test)]
    pub(crate) fn from_root(version: &str, root: &Utf8Path) -> Self {
        Self {
            version: version.to_owned(),
            root: root.to_path_buf(),
        }
    }

    fn executable(&self, name: &str) -> Utf8PathBuf {
        self.bin_dir()
            .join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
    }
}

/// Validates `raw` and returns its canonical `major.minor.patch` form.
///
/// # Errors
/// Returns [`ErrorKind::InvalidVersion`] for empty or malformed input.
pub(crate) fn validate_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PgEmbedError::new(
            ErrorKind::InvalidVersion,
            eyre!("version must not be empty"),
        ));
    }

    let parsed = provisioner::normalise_version_string(trimmed)
        .map_or_else(|| Version::parse(trimmed), |normalised| Version::parse(&normalised));
    parsed.map_err(|err| {
        PgEmbedError::new(
            ErrorKind::InvalidVersion,
            eyre!("invalid PostgreSQL version '{trimmed}': {err}"),
        )
    })
}

/// Resolves binary sets from the shared cache, provisioning on a miss.
pub(crate) struct VersionResolver {
    cache_root: Utf8PathBuf,
    provision_timeout: Duration,
    provisioner: Box<dyn BinaryProvisioner>,
}

impl VersionResolver {
    pub(crate) fn new(
        cache_root: Utf8PathBuf,
        provision_timeout: Duration,
        provisioner: Box<dyn BinaryProvisioner>,
    ) -> Self {
        Self {
            cache_root,
            provision_timeout,
            provisioner,
        }
    }

    /// Builds a resolver over the configured (or default) cache root.
    pub(crate) fn with_default_provisioner(
        explicit_root: Option<&Utf8Path>,
        provision_timeout: Duration,
    ) -> Self {
        Self::new(
            cache::resolve_cache_dir(explicit_root),
            provision_timeout,
            Box::new(PostgresqlEmbeddedProvisioner),
        )
    }

    /// Returns the binary set for `raw_version`.
    ///
    /// # Errors
    /// - [`ErrorKind::InvalidVersion`] when the version is malformed or unknown.
    /// - [`ErrorKind::ProvisioningFailed`] when fetching or installing fails.
    pub(crate) fn resolve(&self, raw_version: &str) -> Result<BinarySet> {
        let version = validate_version(raw_version)?;
        let key = version.to_string();
        let span = info_span!(target: CACHE_LOG_TARGET, "resolve_binaries", version = %key);
        let _entered = span.enter();

        if let Some(root) = cache::check_cache(&self.cache_root, &key) {
            return Ok(BinarySet { version: key, root });
        }

        let locks = populate_locks();
        let entry = locks.entry(key.clone()).or_default();
        let _process_guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_guard = CacheLock::acquire_exclusive(&self.cache_root, &cache::lock_key(&key))
            .map_err(|err| {
                PgEmbedError::new(
                    ErrorKind::ProvisioningFailed,
                    eyre!(err).wrap_err(format!("lock binary cache at {}", self.cache_root)),
                )
            })?;

        // Another process or thread may have populated the entry while we waited.
        if let Some(root) = cache::check_cache(&self.cache_root, &key) {
            return Ok(BinarySet { version: key, root });
        }

        let root = self.populate(&version, &key)?;
        Ok(BinarySet { version: key, root })
    }

    fn populate(&self, version: &Version, key: &str) -> Result<Utf8PathBuf> {
        info!(
            target: CACHE_LOG_TARGET,
            version = %key,
            cache_root = %self.cache_root,
            "provisioning PostgreSQL binaries"
        );
        let provisioning_error =
            |report| PgEmbedError::new(ErrorKind::ProvisioningFailed, report);

        crate::fs::ensure_dir_exists(&self.cache_root).map_err(provisioning_error)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.cache_root)
            .map_err(|err| provisioning_error(eyre!(err).wrap_err("create staging directory")))?;
        let staging_path = crate::fs::utf8_path(staging.path()).map_err(provisioning_error)?;

        let installed = self
            .provisioner
            .provision(version, &staging_path, self.provision_timeout)
            .map_err(|failure| match failure {
                ProvisionFailure::UnknownVersion(report) => PgEmbedError::new(
                    ErrorKind::InvalidVersion,
                    report.wrap_err(format!("PostgreSQL version {key} does not exist")),
                ),
                ProvisionFailure::Failed(report) => PgEmbedError::new(
                    ErrorKind::ProvisioningFailed,
                    report.wrap_err(format!("failed to provision PostgreSQL {key}")),
                ),
            })?;

        cache::publish_entry(&self.cache_root, key, &installed).map_err(provisioning_error)
    }
}
