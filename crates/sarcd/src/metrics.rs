//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics   Prometheus text format
//!   GET /healthz   Liveness probe (always 200 if process is running)
//!   GET /readyz    Readiness probe (200 if storage is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use sarc_archive::{ArchiveError, SweepReport};
use std::sync::Arc;

type Labels = Vec<(String, String)>;

/// Counters for archive operations, integrity failures and sweeps.
#[derive(Clone, Default)]
pub struct ArchiveMetrics {
    operations: Family<Labels, Counter>,
    integrity_failures: Counter,
    sweep_actions: Family<Labels, Counter>,
}

impl ArchiveMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "sarc_archive_operations",
            "Archive operations by operation and outcome",
            metrics.operations.clone(),
        );
        registry.register(
            "sarc_integrity_failures",
            "Retrievals rejected by AEAD tag or checksum verification",
            metrics.integrity_failures.clone(),
        );
        registry.register(
            "sarc_sweep_actions",
            "Objects and rows handled by the reconciliation and lifecycle sweeps",
            metrics.sweep_actions.clone(),
        );
        metrics
    }

    /// Count one operation; `outcome` is "ok" or the error kind.
    pub fn record<T>(&self, operation: &str, result: &Result<T, ArchiveError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.operations
            .get_or_create(&vec![
                ("operation".to_string(), operation.to_string()),
                ("outcome".to_string(), outcome.to_string()),
            ])
            .inc();
        if matches!(result, Err(ArchiveError::Integrity { .. })) {
            self.integrity_failures.inc();
        }
    }

    pub fn record_sweep(&self, report: &SweepReport) {
        for (action, n) in [
            ("orphan_removed", report.orphans_removed),
            ("stale_reservation_removed", report.stale_reservations_removed),
            ("delete_finished", report.deletes_finished),
            ("expired_found", report.expired_found),
            ("expired_purged", report.expired_purged),
            ("error", report.errors),
        ] {
            if n > 0 {
                self.sweep_actions
                    .get_or_create(&vec![("action".to_string(), action.to_string())])
                    .inc_by(n);
            }
        }
    }

    pub fn integrity_failures(&self) -> u64 {
        self.integrity_failures.get()
    }
}

/// Shared health state
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

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9480")
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
        Some(op) => match sarc_storage::check_health(op).await {
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

    fn state(operator: Option<opendal::Operator>) -> (HealthState, ArchiveMetrics) {
        let mut registry = Registry::default();
        let metrics = ArchiveMetrics::new(&mut registry);
        (
            HealthState {
                registry: Arc::new(registry),
                operator,
            },
            metrics,
        )
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_exposes_counters() {
        let (state, metrics) = state(None);
        metrics.record::<()>("archive", &Ok(()));
        metrics.record::<()>(
            "retrieve",
            &Err(ArchiveError::Integrity {
                archive_id: "a1".into(),
                reason: "tag mismatch".into(),
            }),
        );
        metrics.record_sweep(&SweepReport {
            orphans_removed: 2,
            ..Default::default()
        });
        assert_eq!(metrics.integrity_failures(), 1);

        let (status, body) = get_body(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("sarc_integrity_failures_total 1"));
        assert!(body.contains("outcome=\"integrity_error\""));
        assert!(body.contains("action=\"orphan_removed\""));
    }

    #[tokio::test]
    async fn test_probes() {
        let (no_storage, _) = state(None);
        assert_eq!(
            get_body(router(no_storage.clone()), "/healthz").await.0,
            StatusCode::OK
        );
        assert_eq!(
            get_body(router(no_storage), "/readyz").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let op = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let (ready, _) = state(Some(op));
        assert_eq!(get_body(router(ready), "/readyz").await.0, StatusCode::OK);
    }
}
