//! The embedded instance: lifecycle state machine and public contract.
//!
//! [`EmbeddedPostgres`] owns the supervised server process, its directories,
//! its port, and its state. Administrative calls take `&self` and open their
//! own connections; `start` and `stop` take `&mut self`, so the borrow checker
//! keeps them from racing administrative calls.

mod metadata;
mod state;

use camino::Utf8Path;
use color_eyre::eyre::eyre;
use tracing::{info, info_span, warn};

use crate::admin::{AdminClient, AdminDeadline};
use crate::config::EmbeddedConfig;
use crate::error::{ErrorKind, PgEmbedError, Result};
use crate::observability::LOG_TARGET;
use crate::resolver::{BinarySet, VersionResolver};
use crate::resources::RuntimeResources;
use crate::supervisor::{self, LaunchRequest, ServerProcess, warn_stop_failure};

pub use self::metadata::ConnectionMetadata;
pub use self::state::InstanceState;

/// Handles held only while a server process may be alive.
#[derive(Debug)]
struct Running {
    binaries: BinarySet,
    resources: RuntimeResources,
    process: ServerProcess,
}

/// A locally running `PostgreSQL` server and its resources.
///
/// Dropping a running instance stops it on a best-effort basis; call
/// [`stop`](Self::stop) to observe shutdown errors.
///
/// # Examples
/// ```no_run
/// use pgembed::{EmbeddedConfig, EmbeddedPostgres};
///
/// # fn main() -> pgembed::Result<()> {
/// let mut pg = EmbeddedPostgres::new(EmbeddedConfig::new("16.4.0").with_password("pw"))?;
/// pg.create_database("app", "")?;
/// assert!(pg.database_exists("app")?);
/// let url = pg.connection_string("app")?;
/// assert!(url.starts_with("postgresql://postgres:pw@127.0.0.1:"));
/// pg.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EmbeddedPostgres {
    config: EmbeddedConfig,
    state: InstanceState,
    running: Option<Running>,
}

impl EmbeddedPostgres {
    /// Creates an instance and starts it, blocking until the server is ready.
    ///
    /// # Errors
    /// Propagates every failure from [`start`](Self::start).
    pub fn new(config: EmbeddedConfig) -> Result<Self> {
        let mut instance = Self::prepare(config);
        instance.start()?;
        Ok(instance)
    }

    /// Creates an instance in the [`InstanceState::NotStarted`] state.
    #[must_use]
    pub const fn prepare(config: EmbeddedConfig) -> Self {
        Self {
            config,
            state: InstanceState::NotStarted,
            running: None,
        }
    }

    /// Resolves binaries, allocates resources, and launches the server.
    ///
    /// An invalid version is rejected before any directory is created or
    /// process spawned. Any failure leaves the instance
    /// [`Stopped`](InstanceState::Stopped) with nothing running.
    ///
    /// # Errors
    /// - [`ErrorKind::InvalidState`] when the instance was already started.
    /// - [`ErrorKind::InvalidVersion`], [`ErrorKind::ProvisioningFailed`],
    ///   [`ErrorKind::ResourceError`], [`ErrorKind::LaunchFailed`], or
    ///   [`ErrorKind::StartupTimeout`] from the corresponding start phase.
    pub fn start(&mut self) -> Result<()> {
        let resolver = VersionResolver::with_default_provisioner(
            self.config.binary_cache_dir(),
            self.config.provision_timeout(),
        );
        self.start_with(&resolver)
    }

    pub(crate) fn start_with(&mut self, resolver: &VersionResolver) -> Result<()> {
        if !self.state.can_start() {
            return Err(PgEmbedError::new(
                ErrorKind::InvalidState,
                eyre!("cannot start: instance is {}", self.state),
            ));
        }
        let span = info_span!(target: LOG_TARGET, "start", version = self.config.version());
        let _entered = span.enter();

        self.state = InstanceState::Starting;
        match self.bring_up(resolver) {
            Ok(running) => {
                info!(
                    target: LOG_TARGET,
                    version = running.binaries.version(),
                    port = running.resources.port(),
                    data_dir = %running.resources.data_dir(),
                    pid = running.process.pid(),
                    "embedded postgres running"
                );
                self.running = Some(running);
                self.state = InstanceState::Running;
                Ok(())
            }
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, kind = err.kind().as_str(), "start failed");
                self.state = InstanceState::Stopped;
                Err(err)
            }
        }
    }

    fn bring_up(&self, resolver: &VersionResolver) -> Result<Running> {
        let binaries = resolver.resolve(self.config.version())?;
        let resources = RuntimeResources::allocate(
            self.config.data_dir(),
            self.config.runtime_dir(),
            self.config.port(),
        )?;
        let launched = supervisor::launch(&LaunchRequest {
            binaries: &binaries,
            data_dir: resources.data_dir(),
            runtime_dir: resources.runtime_dir(),
            port: resources.port(),
            superuser: self.config.superuser(),
            password: self.config.password(),
            locale: self.config.locale(),
            encoding: self.config.encoding(),
            server_settings: self.config.server_settings(),
            startup_timeout: self.config.startup_timeout(),
            shutdown_timeout: self.config.shutdown_timeout(),
        });
        match launched {
            Ok(process) => Ok(Running {
                binaries,
                resources,
                process,
            }),
            Err(err) => {
                resources.release();
                Err(err)
            }
        }
    }

    /// Stops the server and releases its resources.
    ///
    /// Idempotent: stopping a stopped or never-started instance succeeds. If
    /// shutdown cannot be confirmed the instance stays
    /// [`Stopping`](InstanceState::Stopping) and a later call (or drop) retries.
    ///
    /// # Errors
    /// Returns [`ErrorKind::ShutdownFailed`] when the process cannot be
    /// confirmed gone.
    pub fn stop(&mut self) -> Result<()> {
        if !self.state.owns_process() {
            self.state = InstanceState::Stopped;
            return Ok(());
        }
        let span = info_span!(target: LOG_TARGET, "stop", version = self.config.version());
        let _entered = span.enter();

        self.state = InstanceState::Stopping;
        if let Some(running) = self.running.as_mut() {
            running.process.stop()?;
        }
        if let Some(running) = self.running.take() {
            running.resources.release();
        }
        self.state = InstanceState::Stopped;
        info!(target: LOG_TARGET, "embedded postgres stopped");
        Ok(())
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> InstanceState {
        self.state
    }

    /// Reports whether the instance accepts administrative operations.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, InstanceState::Running)
    }

    /// Returns the configuration the instance was created with.
    #[must_use]
    pub const fn config(&self) -> &EmbeddedConfig {
        &self.config
    }

    /// Returns the bound port while the server is running.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.resources.port())
    }

    /// Returns the absolute data directory while the server is running.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Utf8Path> {
        self.running
            .as_ref()
            .map(|running| running.resources.data_dir())
    }

    /// Returns the absolute runtime directory while the server is running.
    #[must_use]
    pub fn runtime_dir(&self) -> Option<&Utf8Path> {
        self.running
            .as_ref()
            .map(|running| running.resources.runtime_dir())
    }

    /// Returns the binary set in use while the server is running.
    #[must_use]
    pub fn binaries(&self) -> Option<&BinarySet> {
        self.running.as_ref().map(|running| &running.binaries)
    }

    /// Builds a connection URL for `database` (`postgres` when empty).
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotRunning`] unless the instance is running.
    pub fn connection_string(&self, database: &str) -> Result<String> {
        let operation = format!("build connection string for '{database}'");
        Ok(self.admin(&operation)?.connection_string(database))
    }

    /// Returns the connection metadata of the running instance.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotRunning`] unless the instance is running.
    pub fn metadata(&self) -> Result<ConnectionMetadata> {
        let running = self.running_handles("read connection metadata")?;
        Ok(ConnectionMetadata {
            port: running.resources.port(),
            superuser: self.config.superuser().to_owned(),
            password: self.config.password().map(str::to_owned),
            data_dir: running.resources.data_dir().to_path_buf(),
            runtime_dir: running.resources.runtime_dir().to_path_buf(),
            version: running.binaries.version().to_owned(),
            log_file: supervisor::server_log_path(running.resources.runtime_dir()),
        })
    }

    /// Creates database `name` owned by `owner` (the superuser when empty).
    ///
    /// # Errors
    /// [`ErrorKind::NotRunning`], [`ErrorKind::EmptyName`], or
    /// [`ErrorKind::AdminOperationFailed`] carrying the server's message.
    pub fn create_database(&self, name: &str, owner: &str) -> Result<()> {
        self.create_database_with_deadline(name, owner, AdminDeadline::none())
    }

    /// [`create_database`](Self::create_database) bounded by `deadline`.
    ///
    /// # Errors
    /// As [`create_database`](Self::create_database); an expired deadline is
    /// reported as [`ErrorKind::AdminOperationFailed`].
    pub fn create_database_with_deadline(
        &self,
        name: &str,
        owner: &str,
        deadline: AdminDeadline,
    ) -> Result<()> {
        self.admin(&format!("create database '{name}'"))?
            .create_database(name, owner, deadline)
    }

    /// Drops database `name`.
    ///
    /// # Errors
    /// [`ErrorKind::NotRunning`], [`ErrorKind::EmptyName`], or
    /// [`ErrorKind::AdminOperationFailed`] carrying the server's message.
    pub fn drop_database(&self, name: &str) -> Result<()> {
        self.drop_database_with_deadline(name, AdminDeadline::none())
    }

    /// [`drop_database`](Self::drop_database) bounded by `deadline`.
    ///
    /// # Errors
    /// As [`drop_database`](Self::drop_database).
    pub fn drop_database_with_deadline(&self, name: &str, deadline: AdminDeadline) -> Result<()> {
        self.admin(&format!("drop database '{name}'"))?
            .drop_database(name, deadline)
    }

    /// Reports whether database `name` exists.
    ///
    /// # Errors
    /// [`ErrorKind::NotRunning`], [`ErrorKind::EmptyName`], or
    /// [`ErrorKind::AdminOperationFailed`] when the server cannot be queried.
    pub fn database_exists(&self, name: &str) -> Result<bool> {
        self.database_exists_with_deadline(name, AdminDeadline::none())
    }

    /// [`database_exists`](Self::database_exists) bounded by `deadline`.
    ///
    /// # Errors
    /// As [`database_exists`](Self::database_exists).
    pub fn database_exists_with_deadline(
        &self,
        name: &str,
        deadline: AdminDeadline,
    ) -> Result<bool> {
        self.admin(&format!("check database '{name}'"))?
            .database_exists(name, deadline)
    }

    fn running_handles(&self, operation: &str) -> Result<&Running> {
        match (self.state, self.running.as_ref()) {
            (InstanceState::Running, Some(running)) => Ok(running),
            _ => Err(PgEmbedError::not_running(operation)),
        }
    }

    fn admin(&self, operation: &str) -> Result<AdminClient<'_>> {
        let running = self.running_handles(operation)?;
        Ok(AdminClient::new(
            running.resources.port(),
            self.config.superuser(),
            self.config.password(),
        ))
    }
}

impl Drop for EmbeddedPostgres {
    fn drop(&mut self) {
        if !self.state.owns_process() {
            return;
        }
        let context = self.port().map_or_else(
            || format!("version {}", self.config.version()),
            |port| format!("version {}, port {port}", self.config.version()),
        );
        info!(target: LOG_TARGET, context = %context, "stopping embedded postgres on drop");
        if let Err(err) = self.stop() {
            warn_stop_failure(&context, &err);
        }
    }
}
