use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::router::ApiState;

/// Mirrors the health gauge so a kubelet probe can read it.
pub async fn healthz(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    if state.collector.state().snapshot().healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}
