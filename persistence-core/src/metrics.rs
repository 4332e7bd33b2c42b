//! Metrics surface (§6): emitted but never interpreted by the engine.
//!
//! A `MetricSink` is ambient plumbing, matching this codebase's treatment of
//! its own metric store (`events::bus` concurrent append, no real collector
//! dependency in the core).

use std::sync::{Arc, Mutex};

use crate::model::Metric;

pub trait MetricSink: Send + Sync {
    fn record(&self, metric: Metric);
}

/// Shared handle to a sink, threaded from a workflow's config down through
/// the retry engine, agent runtime, and tool dispatch.
pub type SharedMetricSink = Arc<dyn MetricSink>;

/// Production default: discards every metric. Swapped for a real collector
/// at the deployment edge, outside this crate's scope.
#[derive(Debug, Default)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn record(&self, _metric: Metric) {}
}

/// In-memory recording sink for tests asserting on emission.
#[derive(Default)]
pub struct RecordingMetricSink {
    recorded: Mutex<Vec<Metric>>,
}

impl RecordingMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Metric> {
        self.recorded.lock().expect("metric sink lock poisoned").clone()
    }
}

impl MetricSink for RecordingMetricSink {
    fn record(&self, metric: Metric) {
        self.recorded.lock().expect("metric sink lock poisoned").push(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;
    use std::collections::BTreeMap;

    #[test]
    fn recording_sink_keeps_emission_order() {
        let sink = RecordingMetricSink::new();
        sink.record(Metric::new("a", MetricKind::Counter, 1.0, BTreeMap::new()));
        sink.record(Metric::new("b", MetricKind::Counter, 1.0, BTreeMap::new()));
        let snapshot = sink.snapshot();
        assert_eq!(snapshot[0].name, "a");
        assert_eq!(snapshot[1].name, "b");
    }
}
