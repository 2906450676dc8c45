//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness probe (always 200 if process is running)
//!   GET /readyz   Readiness probe (200 if storage is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use safesend_core::GrantOp;
use std::sync::Arc;

/// Grant broker counters
#[derive(Clone, Default)]
pub struct BrokerMetrics {
    grants_issued: Family<Vec<(String, String)>, Counter>,
    origin_rejections: Counter,
    grant_errors: Counter,
}

impl BrokerMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "safesend_grants_issued",
            "Access grants issued, by operation",
            metrics.grants_issued.clone(),
        );
        registry.register(
            "safesend_origin_rejections",
            "Grant requests refused because of the caller origin",
            metrics.origin_rejections.clone(),
        );
        registry.register(
            "safesend_grant_errors",
            "Grant requests that failed after passing the origin check",
            metrics.grant_errors.clone(),
        );
        metrics
    }

    pub fn grant_issued(&self, op: GrantOp) {
        self.grants_issued
            .get_or_create(&vec![("op".to_string(), op.label().to_string())])
            .inc();
    }

    pub fn origin_rejected(&self) {
        self.origin_rejections.inc();
    }

    pub fn grant_failed(&self) {
        self.grant_errors.inc();
    }
}

/// Shared state for the health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub operator: Option<opendal::Operator>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9101")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if storage is reachable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.operator.as_ref() {
        Some(op) => match safesend_storage::probe_bucket(op).await {
            Ok(()) => (StatusCode::OK, "ready"),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "no storage operator"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_exposes_counters() {
        let mut registry = Registry::default();
        let metrics = BrokerMetrics::new(&mut registry);
        metrics.grant_issued(GrantOp::Put);
        metrics.grant_issued(GrantOp::Put);
        metrics.origin_rejected();

        let app = router(HealthState {
            registry: Arc::new(registry),
            operator: None,
        });
        let (status, body) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("safesend_grants_issued_total{op=\"upload\"} 2"));
        assert!(body.contains("safesend_origin_rejections_total 1"));
        assert!(body.contains("safesend_grant_errors_total 0"));
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        let app = router(HealthState {
            registry: Arc::new(Registry::default()),
            operator: None,
        });
        let (status, body) = get_body(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readyz_reflects_storage() {
        let app = router(HealthState {
            registry: Arc::new(Registry::default()),
            operator: None,
        });
        let (status, _) = get_body(app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let memory = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let app = router(HealthState {
            registry: Arc::new(Registry::default()),
            operator: Some(memory),
        });
        let (status, body) = get_body(app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }
}
