//! Administrative database operations against a running instance.
//!
//! Each call opens its own connection to the `postgres` database as the
//! superuser, runs one statement, and closes the connection.

mod connection_string;
mod deadline;
mod identifier;

use std::time::Duration;

use color_eyre::eyre::eyre;
use postgres::{Client, Config, NoTls};
use tracing::{debug, info_span};

use self::identifier::quote_identifier;
use crate::error::{ErrorKind, PgEmbedError, Result};
use crate::observability::LOG_TARGET;

pub use self::deadline::AdminDeadline;
pub(crate) use self::connection_string::DEFAULT_DATABASE;

const EXISTS_QUERY: &str = "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)";

/// Superuser connection parameters for one running instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdminClient<'a> {
    port: u16,
    superuser: &'a str,
    password: Option<&'a str>,
}

impl<'a> AdminClient<'a> {
    pub(crate) const fn new(port: u16, superuser: &'a str, password: Option<&'a str>) -> Self {
        Self {
            port,
            superuser,
            password,
        }
    }

    pub(crate) fn connection_string(&self, database: &str) -> String {
        connection_string::build(self.superuser, self.password, self.port, database)
    }

    pub(crate) fn create_database(
        &self,
        name: &str,
        owner: &str,
        deadline: AdminDeadline,
    ) -> Result<()> {
        let operation = format!("create database '{name}'");
        require_name(name, &operation)?;
        let owner_role = if owner.is_empty() { self.superuser } else { owner };
        let _span =
            info_span!(target: LOG_TARGET, "create_database", db = %name, owner = %owner_role)
                .entered();
        let sql = format!(
            "CREATE DATABASE {} OWNER {}",
            quote_identifier(name),
            quote_identifier(owner_role)
        );
        let mut client = self.connect(deadline, &operation)?;
        client
            .batch_execute(&sql)
            .map_err(|err| admin_failure(&operation, &err))?;
        debug!(target: LOG_TARGET, db = %name, "database created");
        Ok(())
    }

    pub(crate) fn drop_database(&self, name: &str, deadline: AdminDeadline) -> Result<()> {
        let operation = format!("drop database '{name}'");
        require_name(name, &operation)?;
        let _span = info_span!(target: LOG_TARGET, "drop_database", db = %name).entered();
        let sql = format!("DROP DATABASE {}", quote_identifier(name));
        let mut client = self.connect(deadline, &operation)?;
        client
            .batch_execute(&sql)
            .map_err(|err| admin_failure(&operation, &err))?;
        debug!(target: LOG_TARGET, db = %name, "database dropped");
        Ok(())
    }

    pub(crate) fn database_exists(&self, name: &str, deadline: AdminDeadline) -> Result<bool> {
        let operation = format!("check whether database '{name}' exists");
        require_name(name, &operation)?;
        let mut client = self.connect(deadline, &operation)?;
        let row = client
            .query_one(EXISTS_QUERY, &[&name])
            .map_err(|err| admin_failure(&operation, &err))?;
        row.try_get(0)
            .map_err(|err| admin_failure(&operation, &err))
    }

    fn connect(&self, deadline: AdminDeadline, operation: &str) -> Result<Client> {
        let config = self.client_config(deadline, operation)?;
        config
            .connect(NoTls)
            .map_err(|err| admin_failure(operation, &err))
    }

    fn client_config(&self, deadline: AdminDeadline, operation: &str) -> Result<Config> {
        let mut config = Config::new();
        config
            .host("127.0.0.1")
            .port(self.port)
            .user(self.superuser)
            .dbname(DEFAULT_DATABASE);
        if let Some(password) = self.password {
            config.password(password);
        }
        if let Some(remaining) = deadline.remaining() {
            if remaining.is_zero() {
                return Err(PgEmbedError::new(
                    ErrorKind::AdminOperationFailed,
                    eyre!("cannot {operation}: deadline expired before connecting"),
                ));
            }
            config
                .connect_timeout(remaining)
                .options(&statement_timeout_option(remaining));
        }
        Ok(config)
    }
}

/// Largest `statement_timeout` the server accepts, in milliseconds.
const MAX_STATEMENT_TIMEOUT_MS: u128 = 2_147_483_647;

/// Server-side timeout in whole milliseconds, clamped to what the server accepts.
fn statement_timeout_option(remaining: Duration) -> String {
    let millis = remaining.as_millis().clamp(1, MAX_STATEMENT_TIMEOUT_MS);
    format!("-c statement_timeout={millis}")
}

fn require_name(name: &str, operation: &str) -> Result<()> {
    if name.is_empty() {
        Err(PgEmbedError::empty_name(operation))
    } else {
        Ok(())
    }
}

fn admin_failure(operation: &str, err: &postgres::Error) -> PgEmbedError {
    let failure = PgEmbedError::new(
        ErrorKind::AdminOperationFailed,
        eyre!("failed to {operation}: {err}"),
    );
    match err.as_db_error() {
        Some(db_error) => failure.with_server_message(db_error.message()),
        None => failure,
    }
}
