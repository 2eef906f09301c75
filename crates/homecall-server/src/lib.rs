use std::{net::SocketAddr, sync::Arc};

use homecall_api::PullExporter;
use homecall_common::{Config, Metric, Result};
use homecall_metrics::{Collector, MetricState};
use homecall_push::{Broker, KubePodCounter, PodCounter, PushExporter};
use tracing::{info, warn};

pub use homecall_common as common;
pub use homecall_metrics::MetricSnapshot;

/// Mutation API handed to the reconciler. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    state: Arc<MetricState>,
}

impl MetricsHandle {
    pub fn increment_reconcile_count(&self) {
        self.state.increment_reconcile_count();
    }

    pub fn increment_reconcile_errors(&self) {
        self.state.increment_reconcile_errors();
    }

    pub fn set_health(&self, healthy: bool) {
        self.state.set_health(healthy);
    }
}

/// Owns the metric state and both export sinks for one host controller.
pub struct Telemetry {
    state: Arc<MetricState>,
    collector: Collector,
    pull: PullExporter,
    push: PushExporter,
}

impl Telemetry {
    pub fn new(config: Config) -> Self {
        let state = Arc::new(MetricState::new(&config.namespace, &config.cluster));
        let collector = Collector::new(Arc::clone(&state));
        let pull = PullExporter::new(config.metrics_addr(), collector.clone());

        let mut push = PushExporter::new(config.clone(), collector.clone());
        if let Some(pod_counter) = pod_counter(&config) {
            push = push.with_pod_counter(pod_counter);
        }

        Self {
            state,
            collector,
            pull,
            push,
        }
    }

    /// Delivers push messages to `broker` instead of the producer built from
    /// the configured address. The broker address and topic are still required.
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.push = self.push.with_broker(broker);
        self
    }

    pub fn with_pod_counter(mut self, pod_counter: Arc<dyn PodCounter>) -> Self {
        self.push = self.push.with_pod_counter(pod_counter);
        self
    }

    pub fn handle(&self) -> MetricsHandle {
        MetricsHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        self.state.snapshot()
    }

    pub fn sample(&self) -> Vec<Metric> {
        self.collector.sample()
    }

    /// Starts the scrape endpoint; safe to call repeatedly until `shutdown`.
    pub async fn start_pull(&self) -> Result<SocketAddr> {
        self.pull.ensure_started().await
    }

    /// Starts the publish loop; safe to call repeatedly. Fails when the
    /// broker address or topic is not configured, and after `shutdown`.
    pub async fn start_push(&self) -> Result<()> {
        self.push.ensure_started().await
    }

    pub fn is_pushing(&self) -> bool {
        self.push.is_running()
    }

    pub async fn shutdown(&self) {
        self.push.shutdown().await;
        self.pull.shutdown().await;
        info!("telemetry stopped");
    }
}

fn pod_counter(config: &Config) -> Option<Arc<dyn PodCounter>> {
    if !config.pod_counts_enabled {
        return None;
    }
    let Some(api_server) = config.kube_api_server.as_deref() else {
        info!("not running inside a cluster, pod counts disabled");
        return None;
    };

    match KubePodCounter::in_cluster(api_server) {
        Ok(counter) => Some(Arc::new(counter)),
        Err(err) => {
            warn!(error = %err, "pod counts disabled");
            None
        }
    }
}
