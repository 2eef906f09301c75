use std::sync::Arc;

use homecall_common::Metric;

use crate::{
    process::ProcessStats,
    state::{MetricSnapshot, MetricState},
};

pub const MEMORY_USAGE_BYTES: &str = "memory_usage_bytes";
pub const CPU_USAGE_CORES: &str = "cpu_usage_cores";
pub const HEALTH: &str = "health";
pub const RECONCILE_COUNT: &str = "reconcile_count";
pub const RECONCILE_ERRORS: &str = "reconcile_errors";
pub const LAST_SUCCESSFUL_RECONCILE_TIME: &str = "last_successful_reconcile_time";

/// Merges the reconcile state with live process facts into the flat metric
/// list both sinks export.
#[derive(Debug, Clone)]
pub struct Collector {
    state: Arc<MetricState>,
}

impl Collector {
    pub fn new(state: Arc<MetricState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<MetricState> {
        &self.state
    }

    pub fn sample(&self) -> Vec<Metric> {
        self.sample_with_snapshot().1
    }

    /// Samples once and also returns the snapshot the metrics were built
    /// from, for callers that need its labels.
    pub fn sample_with_snapshot(&self) -> (MetricSnapshot, Vec<Metric>) {
        let snapshot = self.state.snapshot();
        let metrics = build_metrics(&snapshot, ProcessStats::read());
        (snapshot, metrics)
    }
}

pub fn build_metrics(snapshot: &MetricSnapshot, process: ProcessStats) -> Vec<Metric> {
    vec![
        Metric::gauge(
            MEMORY_USAGE_BYTES,
            "Memory usage in bytes of the operator",
            process.resident_memory_bytes as f64,
        ),
        Metric::gauge(
            CPU_USAGE_CORES,
            "Concurrent tasks running in the operator",
            process.active_tasks as f64,
        ),
        Metric::gauge(
            HEALTH,
            "Health status of the operator (1 = healthy, 0 = not healthy)",
            snapshot.health_value(),
        ),
        Metric::counter(
            RECONCILE_COUNT,
            "Number of reconciliations performed",
            snapshot.reconcile_count as f64,
        ),
        Metric::counter(
            RECONCILE_ERRORS,
            "Number of reconciliation errors",
            snapshot.reconcile_errors as f64,
        ),
        Metric::gauge(
            LAST_SUCCESSFUL_RECONCILE_TIME,
            "Unix time in seconds of the last successful reconciliation, 0 if none",
            snapshot.last_successful_reconcile_secs() as f64,
        ),
    ]
}
