//! Serialisation guard shared by server-backed test suites.

use rstest::fixture;
use std::sync::{Mutex, MutexGuard};

static SCENARIO_MUTEX: Mutex<()> = Mutex::new(());

#[derive(Debug)]
#[must_use = "Hold this guard for the duration of the serialised scenario"]
pub struct ScenarioSerialGuard {
    _guard: MutexGuard<'static, ()>,
}

#[fixture]
pub fn serial_guard() -> ScenarioSerialGuard {
    let guard = SCENARIO_MUTEX
        .lock()
        .unwrap_or_else(|poison| poison.into_inner());
    ScenarioSerialGuard { _guard: guard }
}
