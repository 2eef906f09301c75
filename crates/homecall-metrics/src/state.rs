use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use homecall_common::time;

#[derive(Debug, Clone, Copy)]
struct Counters {
    reconcile_count: u64,
    reconcile_errors: u64,
    healthy: bool,
    last_successful_reconcile: Option<DateTime<Utc>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            reconcile_count: 0,
            reconcile_errors: 0,
            healthy: true,
            last_successful_reconcile: None,
        }
    }
}

/// Point-in-time copy of [`MetricState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub namespace: String,
    pub cluster: String,
    pub reconcile_count: u64,
    pub reconcile_errors: u64,
    pub healthy: bool,
    pub last_successful_reconcile: Option<DateTime<Utc>>,
}

impl MetricSnapshot {
    pub fn health_value(&self) -> f64 {
        if self.healthy { 1.0 } else { 0.0 }
    }

    pub fn last_successful_reconcile_secs(&self) -> i64 {
        time::epoch_secs_or_zero(self.last_successful_reconcile.as_ref())
    }
}

/// Reconcile counters and the health gauge. Every operation takes the lock
/// exactly once, so a reader never sees a count without its timestamp.
#[derive(Debug)]
pub struct MetricState {
    namespace: String,
    cluster: String,
    counters: Mutex<Counters>,
}

impl MetricState {
    pub fn new(namespace: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cluster: cluster.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Counts a successful reconcile and stamps it as the latest success.
    pub fn increment_reconcile_count(&self) {
        let now = time::now();
        let mut counters = self.lock();
        counters.reconcile_count = counters.reconcile_count.saturating_add(1);
        counters.last_successful_reconcile = Some(match counters.last_successful_reconcile {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }

    pub fn increment_reconcile_errors(&self) {
        let mut counters = self.lock();
        counters.reconcile_errors = counters.reconcile_errors.saturating_add(1);
    }

    pub fn set_health(&self, healthy: bool) {
        self.lock().healthy = healthy;
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let counters = *self.lock();
        MetricSnapshot {
            namespace: self.namespace.clone(),
            cluster: self.cluster.clone(),
            reconcile_count: counters.reconcile_count,
            reconcile_errors: counters.reconcile_errors,
            healthy: counters.healthy,
            last_successful_reconcile: counters.last_successful_reconcile,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    // Counters are plain integers, a panicking holder cannot leave them torn.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
