//! Runs a real `PostgreSQL` server as a supervised child process.
//!
//! The library resolves a concrete server version to a cached set of
//! binaries, downloading them on first use, then initialises a data
//! directory, launches the server on a loopback port, and waits until it
//! accepts connections. The running [`EmbeddedPostgres`] handle exposes
//! connection metadata and a few administrative helpers, and stops the
//! server (escalating through the `PostgreSQL` shutdown signals) when asked
//! or when dropped.
//!
//! ```no_run
//! use pgembed::{EmbeddedConfig, EmbeddedPostgres};
//!
//! # fn main() -> pgembed::Result<()> {
//! let mut pg = EmbeddedPostgres::new(EmbeddedConfig::new("16.4.0"))?;
//! let url = pg.connection_string("postgres")?;
//! assert!(url.contains("127.0.0.1"));
//! pg.stop()?;
//! # Ok(())
//! # }
//! ```

mod admin;
mod cache;
mod config;
mod error;
mod fs;
mod instance;
mod lock;
mod observability;
mod resolver;
mod resources;
mod supervisor;
#[cfg(test)]
mod test_support;

pub use admin::AdminDeadline;
pub use config::{DEFAULT_SUPERUSER, EmbeddedConfig, EnvConfig};
pub use error::{ErrorKind, PgEmbedError, Result};
pub use instance::{ConnectionMetadata, EmbeddedPostgres, InstanceState};
pub use resolver::BinarySet;
