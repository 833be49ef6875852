//! Probe and metrics HTTP server.
//!
//! Serves `/healthz` (process is up), `/readyz` (the VirtualMachine watcher
//! has started) and `/metrics` (Prometheus text format).

use crate::error::ControllerError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Reconcile counters and the readiness flag shared with the watcher.
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("vmoperator".to_string()), None)?;
        let reconciliations = IntCounterVec::new(
            Opts::new("reconcile_total", "VirtualMachine reconciliations by outcome"),
            &["operation", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new("reconcile_duration_seconds", "VirtualMachine reconcile latency")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["operation"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            ready: AtomicBool::new(false),
        })
    }

    /// Count one reconcile. `result` is "success" or an error label.
    pub fn record(&self, operation: &str, result: &str, elapsed: Duration) {
        self.reconciliations.with_label_values(&[operation, result]).inc();
        self.reconcile_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn reconcile_count(&self, operation: &str, result: &str) -> u64 {
        self.reconciliations.with_label_values(&[operation, result]).get()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Current metrics in Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    if metrics.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Serve probes and metrics until the listener fails.
pub async fn serve(metrics: Arc<Metrics>, port: u16) -> Result<(), ControllerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving probes and metrics on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn request(metrics: &Arc<Metrics>, path: &str) -> (StatusCode, String) {
        let response = router(Arc::clone(metrics))
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn readiness_follows_flag() {
        let metrics = Arc::new(Metrics::new().unwrap());
        assert_eq!(request(&metrics, "/healthz").await.0, StatusCode::OK);
        assert_eq!(request(&metrics, "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);

        metrics.set_ready(true);
        assert_eq!(request(&metrics, "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_expose_reconcile_counters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record("created", "success", Duration::from_millis(250));
        metrics.record("updated", "provider", Duration::from_secs(2));
        metrics.record("updated", "provider", Duration::from_secs(1));

        assert_eq!(metrics.reconcile_count("updated", "provider"), 2);
        let (status, body) = request(&metrics, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("vmoperator_reconcile_total{operation=\"created\",result=\"success\"} 1"));
        assert!(body.contains("vmoperator_reconcile_duration_seconds_count{operation=\"updated\"} 2"));
    }
}
