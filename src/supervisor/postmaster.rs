//! Reads the listening port recorded in `postmaster.pid`.

use camino::Utf8Path;
use color_eyre::eyre::{Result, eyre};

/// File the postmaster writes into the data directory once it is running.
pub(super) const POSTMASTER_PID: &str = "postmaster.pid";

/// Returns the port from line four of `postmaster.pid`, or `None` when the
/// file is absent or not yet fully written.
pub(super) fn read_postmaster_port(data_dir: &Utf8Path) -> Result<Option<u16>> {
    let pid_path = data_dir.join(POSTMASTER_PID);
    let contents = match std::fs::read_to_string(&pid_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(eyre!("failed to read postmaster pid at {pid_path}: {err}")),
    };
    let Some(port_line) = contents.lines().nth(3) else {
        return Ok(None);
    };
    let port = port_line
        .trim()
        .parse::<u16>()
        .map_err(|err| eyre!("failed to parse postmaster port from {pid_path}: {err}"))?;
    Ok(Some(port))
}
