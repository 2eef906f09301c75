use std::sync::Arc;

use axum::{Router, routing::get};
use homecall_metrics::Collector;

use crate::handlers;

pub struct ApiState {
    pub collector: Collector,
}

impl ApiState {
    pub fn new(collector: Collector) -> Self {
        Self { collector }
    }
}

pub fn metrics_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics::prometheus_metrics))
        .route("/healthz", get(handlers::health::healthz))
        .with_state(state)
}
