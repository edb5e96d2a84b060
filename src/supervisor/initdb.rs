//! Initialises a data directory with `initdb` when it is empty.

use std::io::Write as _;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use camino::Utf8Path;
use color_eyre::eyre::{Context, eyre};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use wait_timeout::ChildExt;

use super::output::render_failure;
use crate::error::{ErrorKind, PgEmbedError, ReportExt, Result};
use crate::observability::LOG_TARGET;

/// Marker written by `initdb` into every initialised data directory.
pub(super) const PG_VERSION_FILE: &str = "PG_VERSION";

/// Inputs for one `initdb` run.
pub(super) struct InitdbRequest<'a> {
    pub(super) initdb: &'a Utf8Path,
    pub(super) data_dir: &'a Utf8Path,
    pub(super) superuser: &'a str,
    pub(super) password: Option<&'a str>,
    pub(super) locale: &'a str,
    pub(super) encoding: &'a str,
    pub(super) timeout: Duration,
}

/// Reports whether `data_dir` already holds an initialised cluster.
pub(super) fn is_initialised(data_dir: &Utf8Path) -> bool {
    data_dir.join(PG_VERSION_FILE).is_file()
}

/// Runs `initdb` unless the data directory is already initialised.
pub(super) fn ensure_initialised(request: &InitdbRequest<'_>) -> Result<()> {
    if is_initialised(request.data_dir) {
        debug!(
            target: LOG_TARGET,
            data_dir = %request.data_dir,
            "data directory already initialised"
        );
        return Ok(());
    }

    info!(
        target: LOG_TARGET,
        data_dir = %request.data_dir,
        superuser = request.superuser,
        "initialising data directory"
    );

    // Kept alive until initdb exits; removed on drop.
    let pwfile = request.password.map(write_pwfile).transpose()?;
    let mut command = Command::new(request.initdb.as_std_path());
    command
        .arg("-D")
        .arg(request.data_dir.as_std_path())
        .arg("-U")
        .arg(request.superuser)
        .arg("-E")
        .arg(request.encoding)
        .arg("--locale")
        .arg(request.locale);
    match pwfile {
        Some(ref file) => {
            command.arg("-A").arg("password").arg("--pwfile").arg(file.path());
        }
        None => {
            command.arg("-A").arg("trust");
        }
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = run_with_timeout(&mut command, request.timeout)?;
    if !output.status.success() {
        return Err(PgEmbedError::new(
            ErrorKind::LaunchFailed,
            render_failure(
                &format!("initdb failed for data directory {}", request.data_dir),
                &output,
            ),
        ));
    }
    debug!(target: LOG_TARGET, data_dir = %request.data_dir, "initdb completed");
    Ok(())
}

fn write_pwfile(password: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()
        .context("failed to create initdb password file")
        .with_kind(ErrorKind::LaunchFailed)?;
    writeln!(file, "{password}")
        .and_then(|()| file.flush())
        .context("failed to write initdb password file")
        .with_kind(ErrorKind::LaunchFailed)?;
    Ok(file)
}

fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output> {
    let mut child = command
        .spawn()
        .context("failed to spawn initdb")
        .with_kind(ErrorKind::LaunchFailed)?;

    let waited = match child.wait_timeout(timeout) {
        Ok(waited) => waited,
        Err(err) => {
            drop(child.kill());
            drop(child.wait());
            return Err(PgEmbedError::new(
                ErrorKind::LaunchFailed,
                eyre!("failed to wait for initdb: {err}"),
            ));
        }
    };

    if waited.is_none() {
        drop(child.kill());
        let output = child
            .wait_with_output()
            .context("failed to collect initdb output")
            .with_kind(ErrorKind::LaunchFailed)?;
        return Err(PgEmbedError::new(
            ErrorKind::LaunchFailed,
            render_failure(
                &format!("initdb timed out after {}s", timeout.as_secs()),
                &output,
            ),
        ));
    }

    child
        .wait_with_output()
        .context("failed to collect initdb output")
        .with_kind(ErrorKind::LaunchFailed)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use camino::Utf8PathBuf;

    fn request<'a>(
        initdb: &'a Utf8Path,
        data_dir: &'a Utf8Path,
        password: Option<&'a str>,
    ) -> InitdbRequest<'a> {
        InitdbRequest {
            initdb,
            data_dir,
            superuser: "postgres",
            password,
            locale: "C",
            encoding: "UTF8",
            timeout: Duration::from_secs(5),
        }
    }

    fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 path");
        std::fs::create_dir_all(root.join("data")).expect("data dir");
        (temp, root)
    }

    #[test]
    fn skips_initialised_directory() {
        let (_temp, root) = workspace();
        let data = root.join("data");
        std::fs::write(data.join(PG_VERSION_FILE), "16\n").expect("write PG_VERSION");
        let initdb = root.join("missing-initdb");

        ensure_initialised(&request(&initdb, &data, None)).expect("no initdb needed");
    }

    #[test]
    fn passes_trust_auth_without_password() {
        let (_temp, root) = workspace();
        let data = root.join("data");
        let args_file = root.join("args");
        let initdb = write_script(
            &root,
            "initdb",
            &format!("echo \"$@\" > {args_file}\ntouch {data}/{PG_VERSION_FILE}\n"),
        );

        ensure_initialised(&request(&initdb, &data, None)).expect("initdb succeeds");

        let args = std::fs::read_to_string(&args_file).expect("read args");
        assert!(args.contains("-A trust"), "{args}");
        assert!(args.contains("-U postgres"), "{args}");
        assert!(args.contains("-E UTF8"), "{args}");
        assert!(!args.contains("--pwfile"), "{args}");
    }

    #[test]
    fn passes_password_file_when_password_is_set() {
        let (_temp, root) = workspace();
        let data = root.join("data");
        let captured = root.join("captured");
        let initdb = write_script(
            &root,
            "initdb",
            &format!(
                "while [ $# -gt 0 ]; do\n  if [ \"$1\" = --pwfile ]; then cat \"$2\" > {captured}; fi\n  shift\ndone\n"
            ),
        );

        ensure_initialised(&request(&initdb, &data, Some("s3cret"))).expect("initdb succeeds");

        let password = std::fs::read_to_string(&captured).expect("read captured password");
        assert_eq!(password.trim_end(), "s3cret");
    }

    #[test]
    fn failure_reports_stderr_as_launch_failure() {
        let (_temp, root) = workspace();
        let data = root.join("data");
        let initdb = write_script(&root, "initdb", "echo 'initdb: bad locale' >&2\nexit 1\n");

        let err = ensure_initialised(&request(&initdb, &data, None)).expect_err("initdb fails");

        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
        let rendered = format!("{:?}", err.into_report());
        assert!(rendered.contains("initdb: bad locale"), "{rendered}");
    }

    #[test]
    fn hung_initdb_is_killed_after_timeout() {
        let (_temp, root) = workspace();
        let data = root.join("data");
        let initdb = write_script(&root, "initdb", "exec sleep 30\n");
        let mut req = request(&initdb, &data, None);
        req.timeout = Duration::from_millis(200);

        let err = ensure_initialised(&req).expect_err("initdb times out");
        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
        assert!(err.to_string().contains("timed out"), "{err}");
    }
}
