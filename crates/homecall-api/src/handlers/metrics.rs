use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use homecall_metrics::{exposition, render_prometheus};

use crate::router::ApiState;

pub async fn prometheus_metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let (snapshot, metrics) = state.collector.sample_with_snapshot();
    let payload = render_prometheus(
        &metrics,
        &[
            ("namespace", snapshot.namespace.as_str()),
            ("cluster", snapshot.cluster.as_str()),
        ],
    );

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(exposition::CONTENT_TYPE),
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use homecall_metrics::{Collector, MetricState};
    use tower::ServiceExt;

    use crate::router::{ApiState, metrics_router};

    async fn scrape(state: &Arc<MetricState>) -> String {
        let app = metrics_router(Arc::new(ApiState::new(Collector::new(Arc::clone(state)))));
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4; charset=utf-8"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn scrape_reports_labelled_state() {
        let state = Arc::new(MetricState::new("operators", "prod"));
        state.increment_reconcile_count();
        state.increment_reconcile_errors();

        let body = scrape(&state).await;
        assert!(body.contains("reconcile_count{namespace=\"operators\",cluster=\"prod\"} 1\n"));
        assert!(body.contains("reconcile_errors{namespace=\"operators\",cluster=\"prod\"} 1\n"));
        assert!(body.contains("health{namespace=\"operators\",cluster=\"prod\"} 1\n"));
        assert!(body.contains("# TYPE reconcile_count counter"));
        assert!(body.contains("memory_usage_bytes{"));
        assert!(body.contains("cpu_usage_cores{"));
    }

    #[tokio::test]
    async fn every_scrape_samples_fresh_state() {
        let state = Arc::new(MetricState::new("default", "local"));
        let first = scrape(&state).await;
        assert!(first.contains("reconcile_count{namespace=\"default\",cluster=\"local\"} 0\n"));

        state.increment_reconcile_count();
        state.increment_reconcile_count();
        state.set_health(false);

        let second = scrape(&state).await;
        assert!(second.contains("reconcile_count{namespace=\"default\",cluster=\"local\"} 2\n"));
        assert!(second.contains("health{namespace=\"default\",cluster=\"local\"} 0\n"));
    }
}
