//! Metrics sink interface.
//!
//! The engine reports every executed step to a [`MetricsSink`]. Exporting
//! to a monitoring backend is left to whoever embeds the library.

use crate::types::ProbeOutcome;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// One step's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeMetric {
    pub sequence: String,
    pub target: String,
    pub step: String,
    pub protocol: String,
    pub outcome: ProbeOutcome,

    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Receives step outcomes.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn record(&self, metric: ProbeMetric);
}

/// Emits each metric as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, metric: ProbeMetric) {
        info!(
            target: "registry_prober::metrics",
            sequence = %metric.sequence,
            target_id = %metric.target,
            step = %metric.step,
            protocol = %metric.protocol,
            outcome = %metric.outcome,
            latency_ms = metric.latency.as_millis() as u64,
            "probe metric"
        );
    }
}

/// Keeps every metric in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ProbeMetric>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProbeMetric>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<ProbeMetric> {
        self.lock().clone()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, metric: ProbeMetric) {
        self.lock().push(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(outcome: ProbeOutcome) -> ProbeMetric {
        ProbeMetric {
            sequence: "epp-login-logout".to_string(),
            target: "example".to_string(),
            step: "login".to_string(),
            protocol: "epp".to_string(),
            outcome,
            latency: Duration::from_millis(42),
        }
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.record(metric(ProbeOutcome::Success));
        sink.record(metric(ProbeOutcome::Failure));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].outcome, ProbeOutcome::Failure);
    }

    #[test]
    fn test_metric_serialization() {
        let json = serde_json::to_value(metric(ProbeOutcome::InternalError)).unwrap();
        assert_eq!(json["outcome"], "internal_error");
        assert_eq!(json["latency_ms"], 42);
    }
}
