//! Telemetry hooks for generation sessions.
//! By default, no telemetry is emitted unless a sink is installed via `set_telemetry_sink`.

pub mod types;

pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive telemetry events.
///
/// Implementations must be thread-safe and should not panic; `record_*` may be
/// called from any thread.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_generation(&self, log: GenerationLog);

    fn record_save(&self, _log: SaveLog) {}
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[inline]
fn capture_enabled() -> bool {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return false;
        }
    }
    true
}

pub(crate) fn emit_generation(log: GenerationLog) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_generation(log);
    }
}

pub(crate) fn emit_save(log: SaveLog) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_save(log);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}

#[cfg(test)]
pub(crate) mod test_sink {
    use std::sync::{Arc, Mutex};

    use once_cell::sync::Lazy;

    use super::{GenerationLog, SaveLog, TelemetrySink};

    static GENERATIONS: Lazy<Mutex<Vec<GenerationLog>>> = Lazy::new(|| Mutex::new(Vec::new()));
    static SAVES: Lazy<Mutex<Vec<SaveLog>>> = Lazy::new(|| Mutex::new(Vec::new()));

    struct CaptureSink;

    impl TelemetrySink for CaptureSink {
        fn record_generation(&self, log: GenerationLog) {
            GENERATIONS.lock().unwrap().push(log);
        }
        fn record_save(&self, log: SaveLog) {
            SAVES.lock().unwrap().push(log);
        }
    }

    /// Installs the shared capture sink and enables capture on this thread.
    pub(crate) fn install() {
        let _ = super::set_telemetry_sink(Arc::new(CaptureSink));
        super::test_set_capture_enabled(true);
    }

    /// Generation logs recorded for one request id.
    pub(crate) fn generations_for(request_id: &str) -> Vec<GenerationLog> {
        GENERATIONS
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.request_id.as_deref() == Some(request_id))
            .cloned()
            .collect()
    }

    pub(crate) fn saves_for(request_id: &str) -> Vec<SaveLog> {
        SAVES
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.request_id.as_deref() == Some(request_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_is_gated_per_thread() {
        test_sink::install();
        emit_generation(GenerationLog::new().request_id("gate-on").outcome("complete"));
        test_set_capture_enabled(false);
        emit_generation(GenerationLog::new().request_id("gate-off").outcome("complete"));
        assert_eq!(test_sink::generations_for("gate-on").len(), 1);
        assert!(test_sink::generations_for("gate-off").is_empty());
    }
}
