//! Captures tracing output for assertions in unit tests.
//!
//! Records `WARN`-level logs without timestamps so assertions can match
//! human-readable messages directly.

use std::io::{Result as IoResult, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Level;
use tracing::subscriber::with_default;
use tracing_subscriber::fmt;

struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        let mut guard = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Runs `action`, returning captured warning lines alongside its result.
pub(crate) fn capture_warn_logs<F, R>(action: F) -> (Vec<String>, R)
where
    F: FnOnce() -> R,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer_buffer = Arc::clone(&buffer);
    let subscriber = fmt()
        .with_max_level(Level::WARN)
        .without_time()
        .with_ansi(false)
        .with_writer(move || BufferWriter {
            buffer: Arc::clone(&writer_buffer),
        })
        .finish();

    let result = with_default(subscriber, action);

    let bytes = buffer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let content = String::from_utf8_lossy(&bytes);
    let logs = content.lines().map(str::to_owned).collect();
    (logs, result)
}

#[test]
fn captures_warnings_and_returns_value() {
    let (logs, value) = capture_warn_logs(|| {
        tracing::warn!("something happened");
        tracing::info!("filtered out");
        41 + 1
    });
    assert!(logs.iter().any(|line| line.contains("something happened")));
    assert!(!logs.iter().any(|line| line.contains("filtered out")));
    assert_eq!(value, 42);
}
