//! Lifecycle contract checks that never need a running server.

use camino::Utf8PathBuf;
use color_eyre::eyre::{Result, eyre};
use pgembed::{EmbeddedConfig, EmbeddedPostgres, ErrorKind, InstanceState};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Scratch {
    _guard: TempDir,
    root: Utf8PathBuf,
}

#[fixture]
fn scratch() -> Scratch {
    let guard = tempfile::tempdir().expect("create scratch dir");
    let root = Utf8PathBuf::from_path_buf(guard.path().to_path_buf()).expect("utf8 scratch dir");
    Scratch {
        _guard: guard,
        root,
    }
}

#[rstest]
fn prepared_instance_rejects_every_administrative_call() {
    let pg = EmbeddedPostgres::prepare(EmbeddedConfig::new("16.4.0"));
    assert_eq!(pg.state(), InstanceState::NotStarted);
    assert!(!pg.is_running());
    assert!(pg.port().is_none());

    let kinds = [
        pg.connection_string("postgres").map(drop),
        pg.metadata().map(drop),
        pg.create_database("app", "").map(drop),
        pg.drop_database("app").map(drop),
        pg.database_exists("app").map(drop),
    ]
    .into_iter()
    .map(|result| result.expect_err("instance is not running").kind())
    .collect::<Vec<_>>();

    assert!(kinds.iter().all(|kind| *kind == ErrorKind::NotRunning));
}

#[rstest]
fn not_running_takes_precedence_over_empty_name() {
    let pg = EmbeddedPostgres::prepare(EmbeddedConfig::new("16.4.0"));
    let err = pg.create_database("", "").expect_err("instance is not running");
    assert_eq!(err.kind(), ErrorKind::NotRunning);
}

#[rstest]
fn stop_is_idempotent_before_start() -> Result<()> {
    let mut pg = EmbeddedPostgres::prepare(EmbeddedConfig::new("16.4.0"));
    pg.stop()?;
    assert_eq!(pg.state(), InstanceState::Stopped);
    pg.stop()?;
    assert_eq!(pg.state(), InstanceState::Stopped);
    Ok(())
}

#[rstest]
fn stopped_instance_cannot_restart() -> Result<()> {
    let mut pg = EmbeddedPostgres::prepare(EmbeddedConfig::new("16.4.0"));
    pg.stop()?;
    let err = pg.start().expect_err("stopped is terminal");
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(pg.state(), InstanceState::Stopped);
    Ok(())
}

#[rstest]
#[case::garbage("not-a-version")]
#[case::empty("")]
#[case::whitespace("   ")]
fn invalid_version_fails_before_touching_disk(scratch: Scratch, #[case] version: &str) -> Result<()> {
    let data_dir = scratch.root.join("data");
    let runtime_dir = scratch.root.join("run");
    let cache_dir = scratch.root.join("cache");
    let config = EmbeddedConfig::new(version)
        .with_data_dir(data_dir.clone())
        .with_runtime_dir(runtime_dir.clone())
        .with_binary_cache_dir(cache_dir.clone());

    let mut pg = EmbeddedPostgres::prepare(config);
    let err = pg
        .start()
        .err()
        .ok_or_else(|| eyre!("start with version {version:?} should fail"))?;

    assert_eq!(err.kind(), ErrorKind::InvalidVersion);
    assert_eq!(pg.state(), InstanceState::Stopped);
    assert!(!data_dir.exists());
    assert!(!runtime_dir.exists());
    assert!(!cache_dir.exists());
    Ok(())
}

#[rstest]
fn new_surfaces_invalid_version(scratch: Scratch) {
    let config = EmbeddedConfig::new("sixteen").with_binary_cache_dir(scratch.root.join("cache"));
    let err = EmbeddedPostgres::new(config).expect_err("version is malformed");
    assert_eq!(err.kind(), ErrorKind::InvalidVersion);
    assert!(err.to_string().contains("sixteen"));
}
