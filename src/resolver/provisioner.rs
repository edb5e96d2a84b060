//! Fetches and unpacks binary sets through `postgresql_embedded`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::Report;
use color_eyre::eyre::{Context, eyre};
use postgresql_embedded::{PostgreSQL, Settings, Version, VersionReq};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::observability::CACHE_LOG_TARGET;

/// Why a provisioning attempt failed.
#[derive(Debug)]
pub(crate) enum ProvisionFailure {
    /// The release does not exist upstream.
    UnknownVersion(Report),
    /// Download, unpack, or install failed for any other reason.
    Failed(Report),
}

/// Obtains the binaries for one exact version.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait BinaryProvisioner: Send + Sync {
    /// Installs `version` somewhere inside `staging` and returns the directory
    /// that contains its `bin/` subdirectory.
    fn provision(
        &self,
        version: &Version,
        staging: &Utf8Path,
        timeout: Duration,
    ) -> Result<Utf8PathBuf, ProvisionFailure>;
}

/// Default provisioner backed by `postgresql_embedded`.
///
/// `setup()` also runs `initdb` against a scratch data directory inside the
/// staging area. Only the installed binaries are kept.
#[derive(Debug, Default)]
pub(crate) struct PostgresqlEmbeddedProvisioner;

impl BinaryProvisioner for PostgresqlEmbeddedProvisioner {
    fn provision(
        &self,
        version: &Version,
        staging: &Utf8Path,
        timeout: Duration,
    ) -> Result<Utf8PathBuf, ProvisionFailure> {
        let settings = staging_settings(version, staging).map_err(ProvisionFailure::Failed)?;
        let install_root = settings.installation_dir.clone();

        // Run on a dedicated thread so callers inside a Tokio runtime do not
        // trip the nested `block_on` panic.
        let outcome = std::thread::scope(|scope| {
            scope
                .spawn(|| run_setup(settings, timeout))
                .join()
                .unwrap_or_else(|_| Err(eyre!("provisioning thread panicked")))
        });

        let installed = resolve_installed_dir(&install_root);
        match (outcome, installed) {
            (Ok(()), Some(dir)) => utf8(dir),
            (Ok(()), None) => Err(ProvisionFailure::Failed(eyre!(
                "postgresql_embedded reported success but no bin/ directory exists under {}",
                install_root.display()
            ))),
            (Err(err), Some(dir)) if has_server_binary(&dir) => {
                // Only the scratch initdb failed; the binaries are usable.
                debug!(
                    target: CACHE_LOG_TARGET,
                    error = %err,
                    "ignoring post-install setup failure"
                );
                utf8(dir)
            }
            (Err(err), _) => Err(classify(err)),
        }
    }
}

fn staging_settings(version: &Version, staging: &Utf8Path) -> color_eyre::Result<Settings> {
    let requirement = VersionReq::parse(&format!("={version}"))
        .with_context(|| format!("build version requirement for {version}"))?;
    Ok(Settings {
        version: requirement,
        installation_dir: staging.join("install").into_std_path_buf(),
        data_dir: staging.join("scratch-data").into_std_path_buf(),
        password_file: staging.join("scratch-pgpass").into_std_path_buf(),
        temporary: false,
        trust_installation_dir: false,
        ..Settings::default()
    })
}

fn run_setup(settings: Settings, timeout: Duration) -> color_eyre::Result<()> {
    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let mut postgres = PostgreSQL::new(settings);
        tokio::time::timeout(timeout, postgres.setup())
            .await
            .map_err(|_| eyre!("provisioning timed out after {}s", timeout.as_secs()))?
            .map_err(Report::new)
    })
}

/// Constructs a current-thread Tokio runtime for provisioning work.
fn build_runtime() -> color_eyre::Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime for provisioning")
}

fn classify(err: Report) -> ProvisionFailure {
    let rendered = format!("{err:#}").to_ascii_lowercase();
    if rendered.contains("version not found") {
        ProvisionFailure::UnknownVersion(err)
    } else {
        ProvisionFailure::Failed(err)
    }
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, ProvisionFailure> {
    Utf8PathBuf::from_path_buf(path).map_err(|raw| {
        ProvisionFailure::Failed(eyre!(
            "installation path is not valid UTF-8: {}",
            raw.display()
        ))
    })
}

fn has_server_binary(dir: &Path) -> bool {
    dir.join("bin")
        .join(format!("postgres{}", std::env::consts::EXE_SUFFIX))
        .is_file()
}

/// Finds the directory holding `bin/` under an installation root.
///
/// `postgresql_embedded` either installs directly into the root or into a
/// version-named child; the highest version wins when several exist.
pub(crate) fn resolve_installed_dir(install_dir: &Path) -> Option<PathBuf> {
    if install_dir.join("bin").is_dir() {
        return Some(install_dir.to_path_buf());
    }

    std::fs::read_dir(install_dir)
        .ok()?
        .filter_map(|dir_entry| {
            let entry = dir_entry.ok()?;
            if !entry.file_type().ok()?.is_dir() {
                return None;
            }
            let path = entry.path();
            if !path.join("bin").is_dir() {
                return None;
            }
            let version = parse_installation_version(&path)?;
            Some((version, path))
        })
        .max_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(_, path)| path)
}

fn parse_installation_version(path: &Path) -> Option<Version> {
    let name = path.file_name()?.to_str()?;
    let raw_version = extract_version_prefix(name)?;
    let normalised = normalise_version_string(&raw_version)?;
    Version::parse(&normalised).ok()
}

fn extract_version_prefix(name: &str) -> Option<String> {
    let start = name.find(|ch: char| ch.is_ascii_digit())?;
    let tail = name.get(start..)?;
    let prefix: String = tail
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    Some(prefix.trim_end_matches('.').to_owned())
}

/// Pads `major[.minor[.patch]]` to three numeric components.
pub(crate) fn normalise_version_string(raw: &str) -> Option<String> {
    let mut components = raw
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    if components.is_empty() || components.len() > 3 {
        return None;
    }

    while components.len() < 3 {
        components.push(0);
    }

    let [major, minor, patch] = components.as_slice() else {
        return None;
    };

    Some(format!("{major}.{minor}.{patch}"))
}
