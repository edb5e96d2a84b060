//! Launches and supervises the `postgres` server process.
//!
//! [`launch`] initialises the data directory when needed, spawns the server
//! with its output appended to `<runtime_dir>/postgres.log`, and blocks until
//! the server accepts connections. Every failure path leaves no process
//! running. [`ServerProcess::stop`] escalates from a fast shutdown to a kill.

mod initdb;
mod output;
mod postmaster;
mod privileges;
mod readiness;
mod shutdown;

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{Context, eyre};
use tracing::{debug, info, info_span, warn};

use self::initdb::{InitdbRequest, ensure_initialised};
use self::readiness::{NotReady, ProbeTarget, wait_until_ready};
use crate::error::{ErrorKind, PgEmbedError, ReportExt, Result};
use crate::observability::LOG_TARGET;
use crate::resolver::BinarySet;

pub(crate) use self::shutdown::warn_stop_failure;

/// Name of the server log inside the runtime directory.
pub(crate) const SERVER_LOG: &str = "postgres.log";

/// Everything needed to bring one server up.
pub(crate) struct LaunchRequest<'a> {
    pub(crate) binaries: &'a BinarySet,
    pub(crate) data_dir: &'a Utf8Path,
    pub(crate) runtime_dir: &'a Utf8Path,
    pub(crate) port: u16,
    pub(crate) superuser: &'a str,
    pub(crate) password: Option<&'a str>,
    pub(crate) locale: &'a str,
    pub(crate) encoding: &'a str,
    pub(crate) server_settings: &'a BTreeMap<String, String>,
    pub(crate) startup_timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
}

/// Handle to the supervised server process.
#[derive(Debug)]
pub(crate) struct ServerProcess {
    child: Option<Child>,
    pid: u32,
    port: u16,
    shutdown_timeout: Duration,
}

impl ServerProcess {
    pub(crate) const fn pid(&self) -> u32 {
        self.pid
    }

    /// Stops the server. Safe to call repeatedly; later calls are no-ops once
    /// the process is confirmed gone. On failure the child is retained so the
    /// stop can be retried.
    pub(crate) fn stop(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let span = info_span!(target: LOG_TARGET, "stop_server", pid = self.pid, port = self.port);
        let _entered = span.enter();
        let outcome = shutdown::terminate(child, self.shutdown_timeout)
            .with_kind(ErrorKind::ShutdownFailed)?;
        info!(target: LOG_TARGET, pid = self.pid, ?outcome, "server stopped");
        self.child = None;
        Ok(())
    }
}

/// Runs the full launch sequence and returns a ready server.
pub(crate) fn launch(request: &LaunchRequest<'_>) -> Result<ServerProcess> {
    let span = info_span!(
        target: LOG_TARGET,
        "launch_server",
        version = request.binaries.version(),
        port = request.port,
        data_dir = %request.data_dir
    );
    let _entered = span.enter();

    privileges::ensure_not_root()?;
    ensure_initialised(&InitdbRequest {
        initdb: &request.binaries.initdb(),
        data_dir: request.data_dir,
        superuser: request.superuser,
        password: request.password,
        locale: request.locale,
        encoding: request.encoding,
        timeout: request.startup_timeout,
    })?;

    let log_path = server_log_path(request.runtime_dir);
    let mut child = spawn_server(request, &log_path)?;
    let pid = child.id();
    info!(target: LOG_TARGET, pid, port = request.port, "server process spawned");

    let target = ProbeTarget {
        port: request.port,
        socket_dir: request.runtime_dir,
        user: request.superuser,
        password: request.password,
    };
    match wait_until_ready(&mut child, request.startup_timeout, || {
        target.accepts_connections()
    }) {
        Ok(attempts) => {
            info!(target: LOG_TARGET, pid, port = request.port, attempts, "server ready");
            confirm_port(request.data_dir, request.port);
            Ok(ServerProcess {
                child: Some(child),
                pid,
                port: request.port,
                shutdown_timeout: request.shutdown_timeout,
            })
        }
        Err(not_ready) => Err(abandon(child, request, &log_path, not_ready)),
    }
}

fn server_command(request: &LaunchRequest<'_>) -> Command {
    let mut command = Command::new(request.binaries.postgres().as_std_path());
    command
        .arg("-D")
        .arg(request.data_dir.as_std_path())
        .arg("-p")
        .arg(request.port.to_string())
        .arg("-h")
        .arg("127.0.0.1");
    #[cfg(unix)]
    command.arg("-k").arg(request.runtime_dir.as_std_path());
    for (key, value) in request.server_settings {
        command.arg("-c").arg(format!("{key}={value}"));
    }
    command
}

fn spawn_server(request: &LaunchRequest<'_>, log_path: &Utf8Path) -> Result<Child> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open server log {log_path}"))
        .with_kind(ErrorKind::LaunchFailed)?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("duplicate server log handle {log_path}"))
        .with_kind(ErrorKind::LaunchFailed)?;

    let mut command = server_command(request);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    debug!(target: LOG_TARGET, command = ?command, "spawning server");
    command
        .spawn()
        .with_context(|| format!("failed to spawn {}", request.binaries.postgres()))
        .with_kind(ErrorKind::LaunchFailed)
}

/// Tears down a server that never became ready and builds the error.
fn abandon(
    mut child: Child,
    request: &LaunchRequest<'_>,
    log_path: &Utf8Path,
    not_ready: NotReady,
) -> PgEmbedError {
    if let Err(err) = shutdown::terminate(&mut child, request.shutdown_timeout) {
        warn_stop_failure(&format!("port {}", request.port), &err);
        force_reap(&mut child);
    }
    let tail = output::read_log_tail(log_path);
    match not_ready {
        NotReady::Exited(status) => PgEmbedError::new(
            ErrorKind::LaunchFailed,
            eyre!("server exited before accepting connections ({status})\nlog: {tail}"),
        ),
        NotReady::TimedOut => PgEmbedError::new(
            ErrorKind::StartupTimeout,
            eyre!(
                "server did not accept connections on port {} within {}s\nlog: {tail}",
                request.port,
                request.startup_timeout.as_secs()
            ),
        ),
        NotReady::Poll(err) => PgEmbedError::new(
            ErrorKind::LaunchFailed,
            eyre!("failed to poll server process: {err}\nlog: {tail}"),
        ),
    }
}

/// Kills and reaps a child whose orderly teardown failed.
fn force_reap(child: &mut Child) {
    let pid = child.id();
    if let Err(err) = child.kill() {
        debug!(target: LOG_TARGET, pid, error = %err, "kill after failed shutdown");
    }
    if let Err(err) = child.wait() {
        debug!(target: LOG_TARGET, pid, error = %err, "reap after failed shutdown");
    }
}

fn confirm_port(data_dir: &Utf8Path, expected: u16) {
    match postmaster::read_postmaster_port(data_dir) {
        Ok(Some(port)) if port != expected => warn!(
            target: LOG_TARGET,
            expected,
            actual = port,
            "postmaster.pid reports an unexpected port"
        ),
        Ok(_) => {}
        Err(err) => debug!(target: LOG_TARGET, error = %err, "could not read postmaster.pid"),
    }
}

/// Returns the server log path for a runtime directory.
pub(crate) fn server_log_path(runtime_dir: &Utf8Path) -> Utf8PathBuf {
    runtime_dir.join(SERVER_LOG)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{fake_binary_set, write_script};

    struct Fixture {
        _temp: tempfile::TempDir,
        root: Utf8PathBuf,
        settings: BTreeMap<String, String>,
    }

    impl Fixture {
        fn new(postgres_body: &str) -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 path");
            let bin = root.join("install/bin");
            std::fs::create_dir_all(&bin).expect("bin dir");
            std::fs::create_dir_all(root.join("data")).expect("data dir");
            std::fs::create_dir_all(root.join("run")).expect("run dir");
            write_script(&bin, "initdb", "touch \"$2/PG_VERSION\"\n");
            write_script(&bin, "postgres", postgres_body);
            Self {
                _temp: temp,
                root,
                settings: BTreeMap::new(),
            }
        }

        fn launch(&self, binaries: &BinarySet, startup: Duration) -> Result<ServerProcess> {
            let data_dir = self.root.join("data");
            let runtime_dir = self.root.join("run");
            launch(&LaunchRequest {
                binaries,
                data_dir: &data_dir,
                runtime_dir: &runtime_dir,
                port: 1,
                superuser: "postgres",
                password: None,
                locale: "C",
                encoding: "UTF8",
                server_settings: &self.settings,
                startup_timeout: startup,
                shutdown_timeout: Duration::from_secs(1),
            })
        }
    }

    fn running_as_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[test]
    fn server_command_includes_settings_and_socket_dir() {
        let fixture = Fixture::new("exit 0\n");
        let binaries = fake_binary_set(&fixture.root.join("install"));
        let mut settings = BTreeMap::new();
        settings.insert("fsync".to_owned(), "off".to_owned());
        let data_dir = fixture.root.join("data");
        let runtime_dir = fixture.root.join("run");
        let request = LaunchRequest {
            binaries: &binaries,
            data_dir: &data_dir,
            runtime_dir: &runtime_dir,
            port: 5433,
            superuser: "postgres",
            password: None,
            locale: "C",
            encoding: "UTF8",
            server_settings: &settings,
            startup_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(1),
        };

        let command = server_command(&request);
        let args: Vec<_> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-D",
                data_dir.as_str(),
                "-p",
                "5433",
                "-h",
                "127.0.0.1",
                "-k",
                runtime_dir.as_str(),
                "-c",
                "fsync=off",
            ]
        );
    }

    #[test]
    fn early_exit_is_a_launch_failure_with_log_tail() {
        if running_as_root() {
            return;
        }
        let fixture = Fixture::new("echo 'FATAL: could not create lock file' >&2\nexit 1\n");
        let binaries = fake_binary_set(&fixture.root.join("install"));

        let err = fixture
            .launch(&binaries, Duration::from_secs(5))
            .expect_err("server exits early");

        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
        assert!(
            err.to_string().contains("could not create lock file"),
            "{err}"
        );
        assert!(server_log_path(&fixture.root.join("run")).is_file());
    }

    #[test]
    fn unready_server_times_out_and_is_stopped() {
        if running_as_root() {
            return;
        }
        let pid_file = "server.pid";
        let fixture = Fixture::new(&format!("echo $$ > \"$2/{pid_file}\"\nexec sleep 30\n"));
        let binaries = fake_binary_set(&fixture.root.join("install"));

        let err = fixture
            .launch(&binaries, Duration::from_millis(300))
            .expect_err("server never becomes ready");

        assert_eq!(err.kind(), ErrorKind::StartupTimeout);
        let raw_pid = std::fs::read_to_string(fixture.root.join("data").join(pid_file))
            .expect("read pid");
        let pid = nix::unistd::Pid::from_raw(raw_pid.trim().parse().expect("pid"));
        assert!(
            nix::sys::signal::kill(pid, None).is_err(),
            "timed-out server should have been terminated"
        );
    }

    #[test]
    fn missing_server_binary_is_a_launch_failure() {
        if running_as_root() {
            return;
        }
        let fixture = Fixture::new("exit 0\n");
        std::fs::remove_file(fixture.root.join("install/bin/postgres")).expect("remove postgres");
        let binaries = fake_binary_set(&fixture.root.join("install"));

        let err = fixture
            .launch(&binaries, Duration::from_secs(1))
            .expect_err("spawn fails");
        assert_eq!(err.kind(), ErrorKind::LaunchFailed);
    }

    #[test]
    fn stop_is_idempotent() {
        let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let mut process = ServerProcess {
            pid: child.id(),
            child: Some(child),
            port: 1,
            shutdown_timeout: Duration::from_secs(5),
        };

        process.stop().expect("first stop");
        assert!(process.child.is_none());
        process.stop().expect("second stop is a no-op");
    }

    #[test]
    fn force_reap_kills_and_collects_the_child() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        force_reap(&mut child);
        let status = child
            .try_wait()
            .expect("poll child")
            .expect("child already collected");
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }
}
