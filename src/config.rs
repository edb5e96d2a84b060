//! Instance configuration and its environment-driven loader.
//!
//! [`EmbeddedConfig`] is the immutable input for an
//! [`EmbeddedPostgres`](crate::EmbeddedPostgres) instance. [`EnvConfig`] reads
//! the same knobs from `PGEMBED_*` environment variables via `OrthoConfig` and
//! converts them into an [`EmbeddedConfig`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use ortho_config::OrthoConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PgEmbedError, Result};

/// Default administrative role created by `initdb`.
pub const DEFAULT_SUPERUSER: &str = "postgres";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_LOCALE: &str = "C";
const DEFAULT_ENCODING: &str = "UTF8";

/// Configuration for a single embedded `PostgreSQL` instance.
///
/// Only the version is required. Unset directories become ephemeral
/// temporary directories owned by the instance, and a zero port asks the
/// allocator for a free loopback port.
///
/// # Examples
/// ```
/// use pgembed::EmbeddedConfig;
///
/// let config = EmbeddedConfig::new("16.4.0")
///     .with_port(0)
///     .with_password("s3cret");
/// assert_eq!(config.version(), "16.4.0");
/// assert!(config.has_password());
/// ```
pub struct EmbeddedConfig {
    version: String,
    data_dir: Option<Utf8PathBuf>,
    runtime_dir: Option<Utf8PathBuf>,
    port: u16,
    password: Option<SecretString>,
    superuser: String,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    provision_timeout: Duration,
    binary_cache_dir: Option<Utf8PathBuf>,
    locale: String,
    encoding: String,
    server_settings: BTreeMap<String, String>,
}

impl EmbeddedConfig {
    /// Creates a configuration for `version` with every other knob at its default.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            data_dir: None,
            runtime_dir: None,
            port: 0,
            password: None,
            superuser: DEFAULT_SUPERUSER.to_owned(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
            binary_cache_dir: None,
            locale: DEFAULT_LOCALE.to_owned(),
            encoding: DEFAULT_ENCODING.to_owned(),
            server_settings: BTreeMap::new(),
        }
    }

    /// Sets the data directory. An empty path keeps the ephemeral default.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.data_dir = non_empty_path(dir.into());
        self
    }

    /// Sets the runtime (socket and log) directory. An empty path keeps the
    /// ephemeral default.
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.runtime_dir = non_empty_path(dir.into());
        self
    }

    /// Sets the listening port; `0` allocates a free ephemeral port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the superuser password. An empty password means password
    /// authentication is disabled for the local cluster.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let raw: String = password.into();
        self.password = (!raw.is_empty()).then(|| SecretString::from(raw));
        self
    }

    /// Overrides the administrative role name (defaults to `postgres`).
    #[must_use]
    pub fn with_superuser(mut self, superuser: impl Into<String>) -> Self {
        let name: String = superuser.into();
        if !name.is_empty() {
            self.superuser = name;
        }
        self
    }

    /// Bounds how long startup may wait for the server to accept connections.
    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Bounds how long a graceful shutdown may take before escalation.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bounds how long downloading and installing binaries may take.
    #[must_use]
    pub const fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    /// Overrides the shared binary cache root.
    #[must_use]
    pub fn with_binary_cache_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.binary_cache_dir = non_empty_path(dir.into());
        self
    }

    /// Sets the locale passed to `initdb`.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Sets the encoding passed to `initdb`.
    #[must_use]
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Adds a server setting passed to `postgres` as `-c key=value`.
    #[must_use]
    pub fn with_server_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.server_settings.insert(key.into(), value.into());
        self
    }

    /// Returns the requested version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the requested data directory, if any.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Utf8Path> {
        self.data_dir.as_deref()
    }

    /// Returns the requested runtime directory, if any.
    #[must_use]
    pub fn runtime_dir(&self) -> Option<&Utf8Path> {
        self.runtime_dir.as_deref()
    }

    /// Returns the requested port (`0` means "allocate").
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Reports whether a superuser password is configured.
    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_ref().map(ExposeSecret::expose_secret)
    }

    /// Returns the administrative role name.
    #[must_use]
    pub fn superuser(&self) -> &str {
        &self.superuser
    }

    /// Returns the startup timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Returns the graceful shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the provisioning timeout.
    #[must_use]
    pub const fn provision_timeout(&self) -> Duration {
        self.provision_timeout
    }

    /// Returns the binary cache override, if any.
    #[must_use]
    pub fn binary_cache_dir(&self) -> Option<&Utf8Path> {
        self.binary_cache_dir.as_deref()
    }

    /// Returns the `initdb` locale.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Returns the `initdb` encoding.
    #[must_use]
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Returns the extra server settings.
    #[must_use]
    pub const fn server_settings(&self) -> &BTreeMap<String, String> {
        &self.server_settings
    }
}

impl Clone for EmbeddedConfig {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            data_dir: self.data_dir.clone(),
            runtime_dir: self.runtime_dir.clone(),
            port: self.port,
            password: self
                .password
                .as_ref()
                .map(|secret| SecretString::from(secret.expose_secret().to_owned())),
            superuser: self.superuser.clone(),
            startup_timeout: self.startup_timeout,
            shutdown_timeout: self.shutdown_timeout,
            provision_timeout: self.provision_timeout,
            binary_cache_dir: self.binary_cache_dir.clone(),
            locale: self.locale.clone(),
            encoding: self.encoding.clone(),
            server_settings: self.server_settings.clone(),
        }
    }
}

impl fmt::Debug for EmbeddedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedConfig")
            .field("version", &self.version)
            .field("data_dir", &self.data_dir)
            .field("runtime_dir", &self.runtime_dir)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("superuser", &self.superuser)
            .field("startup_timeout", &self.startup_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("binary_cache_dir", &self.binary_cache_dir)
            .finish_non_exhaustive()
    }
}

fn non_empty_path(path: Utf8PathBuf) -> Option<Utf8PathBuf> {
    (!path.as_str().trim().is_empty()).then_some(path)
}

/// Captures instance settings supplied via `PGEMBED_*` environment variables.
///
/// # Examples
/// ```
/// use pgembed::EnvConfig;
///
/// let cfg = EnvConfig::default();
/// assert!(cfg.port.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, OrthoConfig, Default)]
#[ortho_config(prefix = "PGEMBED")]
pub struct EnvConfig {
    /// Exact `PostgreSQL` release to run, e.g. `16.4.0`.
    #[ortho_config(cli_long = "pg-version")]
    pub version: Option<String>,
    /// Port assigned to the embedded server; `0` or unset allocates one.
    pub port: Option<u16>,
    /// Name of the administrative role.
    pub superuser: Option<String>,
    /// Password provisioned for the administrative role.
    pub password: Option<String>,
    /// Directory used for `PostgreSQL` data files.
    pub data_dir: Option<Utf8PathBuf>,
    /// Directory used for sockets and the server log.
    pub runtime_dir: Option<Utf8PathBuf>,
    /// Root of the shared binary cache.
    pub binary_cache_dir: Option<Utf8PathBuf>,
    /// Locale applied to `initdb`.
    pub locale: Option<String>,
    /// Encoding applied to `initdb`.
    pub encoding: Option<String>,
    /// Seconds to wait for the server to accept connections.
    pub startup_timeout_secs: Option<u64>,
    /// Seconds to wait for a graceful shutdown before escalating.
    pub shutdown_timeout_secs: Option<u64>,
}

impl EnvConfig {
    /// Loads configuration from environment variables without parsing CLI arguments.
    ///
    /// # Errors
    /// Returns a [`ErrorKind::ResourceError`] when the environment holds values
    /// that cannot be parsed into the expected types.
    pub fn load() -> Result<Self> {
        let args = [OsString::from("pgembed")];
        Self::load_from_iter(args)
            .map_err(|err| PgEmbedError::new(ErrorKind::ResourceError, eyre!(err)))
    }

    /// Converts the environment snapshot into an [`EmbeddedConfig`].
    ///
    /// # Errors
    /// Returns [`ErrorKind::InvalidVersion`] when no version was supplied.
    pub fn to_config(&self) -> Result<EmbeddedConfig> {
        let version = self
            .version
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| {
                PgEmbedError::new(
                    ErrorKind::InvalidVersion,
                    eyre!("PGEMBED_VERSION must name a PostgreSQL release"),
                )
            })?;

        let mut config = EmbeddedConfig::new(version);
        config = self.apply_connection(config);
        config = self.apply_paths(config);
        config = self.apply_initdb(config);
        Ok(self.apply_timeouts(config))
    }

    fn apply_connection(&self, mut config: EmbeddedConfig) -> EmbeddedConfig {
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(ref superuser) = self.superuser {
            config = config.with_superuser(superuser.clone());
        }
        if let Some(ref password) = self.password {
            config = config.with_password(password.clone());
        }
        config
    }

    fn apply_paths(&self, mut config: EmbeddedConfig) -> EmbeddedConfig {
        if let Some(ref dir) = self.data_dir {
            config = config.with_data_dir(dir.clone());
        }
        if let Some(ref dir) = self.runtime_dir {
            config = config.with_runtime_dir(dir.clone());
        }
        if let Some(ref dir) = self.binary_cache_dir {
            config = config.with_binary_cache_dir(dir.clone());
        }
        config
    }

    fn apply_initdb(&self, mut config: EmbeddedConfig) -> EmbeddedConfig {
        if let Some(ref locale) = self.locale {
            config = config.with_locale(locale.clone());
        }
        if let Some(ref encoding) = self.encoding {
            config = config.with_encoding(encoding.clone());
        }
        config
    }

    fn apply_timeouts(&self, mut config: EmbeddedConfig) -> EmbeddedConfig {
        if let Some(secs) = self.startup_timeout_secs {
            config = config.with_startup_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            config = config.with_shutdown_timeout(Duration::from_secs(secs));
        }
        config
    }
}
