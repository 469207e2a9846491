//! Scalar metric sinks
//!
//! Stage results are reported as named scalars. A final value is also
//! reported under `final_<key>` so summaries can pick up the last stage.

use std::sync::{Arc, Mutex};

pub trait MetricSink: Send {
    fn record(&mut self, key: &str, value: f64);

    fn log(&mut self, key: &str, value: f64, is_final: bool) {
        self.record(key, value);
        if is_final {
            self.record(&format!("final_{key}"), value);
        }
    }
}

/// Emits every metric as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&mut self, key: &str, value: f64) {
        tracing::info!(target: "recordar::metrics", key, value, "metric");
    }
}

/// Keeps metrics in memory, shareable between the runner and its caller
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<(String, f64)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, f64)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Last value recorded under `key`
    pub fn last(&self, key: &str) -> Option<f64> {
        self.entries().into_iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl MetricSink for MemorySink {
    fn record(&mut self, key: &str, value: f64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((key.to_string(), value));
        }
    }
}

/// Forwards to several sinks
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn MetricSink>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Box<dyn MetricSink>>) -> Self {
        Self { sinks }
    }
}

impl MetricSink for FanOut {
    fn record(&mut self, key: &str, value: f64) {
        for sink in &mut self.sinks {
            sink.record(key, value);
        }
    }
}
