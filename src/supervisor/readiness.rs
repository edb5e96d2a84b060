//! Polls a freshly spawned server until it accepts client connections.

use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use postgres::{Config, NoTls};
use tracing::trace;

use crate::observability::LOG_TARGET;

/// Delay before the first retry.
pub(super) const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
/// Upper bound for the delay between attempts.
pub(super) const MAX_BACKOFF: Duration = Duration::from_secs(1);
/// Upper bound for a single connection attempt.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Why the server never became ready.
#[derive(Debug)]
pub(super) enum NotReady {
    /// The process exited while we were waiting.
    Exited(ExitStatus),
    /// The deadline passed with the process still running.
    TimedOut,
    /// Polling the child failed.
    Poll(std::io::Error),
}

/// Doubling delay with a cap.
#[derive(Debug)]
pub(super) struct Backoff {
    next: Duration,
}

impl Backoff {
    pub(super) const fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    /// Returns the current delay and doubles the next one up to the cap.
    pub(super) fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(2).min(MAX_BACKOFF);
        current
    }
}

/// Connection details used by the readiness probe.
///
/// On Unix the probe goes through the server's own socket in `socket_dir`.
/// The postmaster creates it only after its TCP listeners are bound, and a
/// foreign process squatting on the TCP port cannot stall the handshake.
#[derive(Debug, Clone, Copy)]
pub(super) struct ProbeTarget<'a> {
    pub(super) port: u16,
    pub(super) socket_dir: &'a Utf8Path,
    pub(super) user: &'a str,
    pub(super) password: Option<&'a str>,
}

impl ProbeTarget<'_> {
    /// Returns `true` once a client session can be established.
    pub(super) fn accepts_connections(&self) -> bool {
        let mut config = Config::new();
        self.apply_host(&mut config);
        config
            .port(self.port)
            .user(self.user)
            .dbname("postgres")
            .connect_timeout(PROBE_CONNECT_TIMEOUT);
        if let Some(password) = self.password {
            config.password(password);
        }
        match config.connect(NoTls) {
            Ok(client) => {
                drop(client.close());
                true
            }
            Err(err) => {
                trace!(target: LOG_TARGET, port = self.port, error = %err, "server not ready yet");
                false
            }
        }
    }
}

#[cfg(unix)]
impl ProbeTarget<'_> {
    fn apply_host(&self, config: &mut Config) {
        config.host_path(self.socket_dir.as_std_path());
    }
}

#[cfg(not(unix))]
impl ProbeTarget<'_> {
    fn apply_host(&self, config: &mut Config) {
        config.host("127.0.0.1");
    }
}

/// Calls `probe` until it succeeds, the child exits, or `timeout` elapses.
///
/// A timeout too large to represent as an [`Instant`] never expires.
pub(super) fn wait_until_ready(
    child: &mut Child,
    timeout: Duration,
    mut probe: impl FnMut() -> bool,
) -> Result<u32, NotReady> {
    let deadline = Instant::now().checked_add(timeout);
    let mut backoff = Backoff::new();
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        if probe() {
            return Ok(attempts);
        }
        if let Some(status) = child.try_wait().map_err(NotReady::Poll)? {
            return Err(NotReady::Exited(status));
        }
        let delay = backoff.next_delay();
        let Some(deadline) = deadline else {
            std::thread::sleep(delay);
            continue;
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(NotReady::TimedOut);
        }
        std::thread::sleep(delay.min(deadline - now));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sleep")
    }

    fn reap(mut child: Child) {
        drop(child.kill());
        drop(child.wait());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new();
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays.first(), Some(&INITIAL_BACKOFF));
        assert_eq!(delays.get(1), Some(&Duration::from_millis(100)));
        assert_eq!(delays.get(4), Some(&Duration::from_millis(800)));
        assert_eq!(delays.last(), Some(&MAX_BACKOFF));
    }

    #[test]
    fn returns_once_probe_succeeds() {
        let mut child = sleeper();
        let mut calls = 0;
        let attempts = wait_until_ready(&mut child, Duration::from_secs(5), || {
            calls += 1;
            calls >= 3
        })
        .expect("ready");
        assert_eq!(attempts, 3);
        reap(child);
    }

    #[test]
    fn times_out_when_probe_never_succeeds() {
        let mut child = sleeper();
        let started = Instant::now();
        let result = wait_until_ready(&mut child, Duration::from_millis(300), || false);
        assert!(matches!(result, Err(NotReady::TimedOut)), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        reap(child);
    }

    #[test]
    fn unrepresentable_timeout_waits_without_a_deadline() {
        let mut child = sleeper();
        let mut calls = 0;
        let attempts = wait_until_ready(&mut child, Duration::from_secs(u64::MAX), || {
            calls += 1;
            calls >= 2
        })
        .expect("ready");
        assert_eq!(attempts, 2);
        reap(child);
    }

    #[test]
    fn reports_early_exit() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .expect("spawn sh");
        let result = wait_until_ready(&mut child, Duration::from_secs(5), || false);
        match result {
            Err(NotReady::Exited(status)) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected early exit, got {other:?}"),
        }
    }

    #[test]
    fn probe_fails_without_a_server_socket() {
        let temp = tempfile::tempdir().expect("tempdir");
        let socket_dir = Utf8Path::from_path(temp.path()).expect("utf8 tempdir");
        let target = ProbeTarget {
            port: 5432,
            socket_dir,
            user: "postgres",
            password: None,
        };
        assert!(!target.accepts_connections());
    }

    #[test]
    fn probe_ignores_a_foreign_tcp_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let temp = tempfile::tempdir().expect("tempdir");
        let socket_dir = Utf8Path::from_path(temp.path()).expect("utf8 tempdir");
        let target = ProbeTarget {
            port,
            socket_dir,
            user: "postgres",
            password: None,
        };
        assert!(!target.accepts_connections());
        drop(listener);
    }
}
