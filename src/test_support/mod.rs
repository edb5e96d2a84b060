//! Helpers shared by the crate's unit tests.

mod logging;
mod scripts;

pub(crate) use logging::capture_warn_logs;
#[cfg(unix)]
pub(crate) use scripts::write_script;
#[cfg(unix)]
pub(crate) use scripts::fake_binary_set;
