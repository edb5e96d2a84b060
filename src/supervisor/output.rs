//! Output truncation and failure rendering for supervised commands.

use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom};
use std::process::Output;

use camino::Utf8Path;
use color_eyre::Report;
use color_eyre::eyre::eyre;

pub(super) const OUTPUT_CHAR_LIMIT: usize = 2_048;
pub(super) const TRUNCATION_SUFFIX: &str = "… [truncated]";
const TRUNCATION_PREFIX: &str = "[truncated] …";
const LOG_TAIL_BYTES: u64 = 8_192;

/// Renders a command failure with bounded stdout and stderr.
pub(super) fn render_failure(context: &str, output: &Output) -> Report {
    let stdout = truncate_output(String::from_utf8_lossy(&output.stdout));
    let stderr = truncate_output(String::from_utf8_lossy(&output.stderr));
    eyre!(
        "{context} ({status})\nstdout: {stdout}\nstderr: {stderr}",
        status = output.status
    )
}

/// Keeps the first [`OUTPUT_CHAR_LIMIT`] characters.
pub(super) fn truncate_output(text: Cow<'_, str>) -> String {
    let mut out = String::with_capacity(OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.len());
    let mut chars = text.chars();
    for _ in 0..OUTPUT_CHAR_LIMIT {
        match chars.next() {
            Some(ch) => out.push(ch),
            None => return text.into_owned(),
        }
    }

    if chars.next().is_none() {
        return text.into_owned();
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Keeps the last [`OUTPUT_CHAR_LIMIT`] characters.
pub(super) fn tail_output(text: &str) -> String {
    let total = text.chars().count();
    if total <= OUTPUT_CHAR_LIMIT {
        return text.to_owned();
    }
    let kept: String = text.chars().skip(total - OUTPUT_CHAR_LIMIT).collect();
    format!("{TRUNCATION_PREFIX}{kept}")
}

/// Reads the end of the server log for diagnostics. Missing logs yield an
/// empty string.
pub(super) fn read_log_tail(path: &Utf8Path) -> String {
    let Ok(mut file) = std::fs::File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
    if file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES))).is_err() {
        return String::new();
    }
    let mut raw = Vec::new();
    if file.read_to_end(&mut raw).is_err() {
        return String::new();
    }
    tail_output(String::from_utf8_lossy(&raw).trim_end())
}
