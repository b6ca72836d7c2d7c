//! Archive HTTP API
//!
//! All routes live under `/api/v1` and require an `x-actor-id` header
//! naming the authenticated caller; it is recorded on every audit event.
//!
//!   POST   /archive                      archive a closed session
//!   GET    /archive/stats                counts by tier, expiry buckets
//!   GET    /archive/expiring?days=N      stored archives expiring within N days
//!   GET    /archive/check/{session_id}   is this session archived?
//!   GET    /archive/{id}                 metadata (no key material)
//!   GET    /archive/{id}/download        decrypted, verified session payload
//!   PATCH  /archive/{id}/retention       upgrade retention tier
//!   POST   /archive/{id}/extend          extend expiry by N days
//!   DELETE /archive/{id}                 delete (admin override via ?override=true)

use anyhow::Result;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use sarc_archive::{
    ArchiveError, ArchiveManager, ArchiveStats, ArchiveView, DeleteOptions, StatusCheck,
};
use sarc_core::RetentionTier;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics::ArchiveMetrics;

pub const ACTOR_HEADER: &str = "x-actor-id";
const DEFAULT_EXPIRING_DAYS: i64 = 30;

#[derive(Clone)]
pub struct ApiState {
    pub manager: ArchiveManager,
    pub metrics: Arc<ArchiveMetrics>,
}

pub fn router(state: ApiState) -> Router {
    let v1 = Router::new()
        .route("/archive", post(create_archive))
        .route("/archive/stats", get(stats))
        .route("/archive/expiring", get(expiring))
        .route("/archive/check/{session_id}", get(check_status))
        .route("/archive/{id}", get(get_archive).delete(delete_archive))
        .route("/archive/{id}/download", get(download))
        .route("/archive/{id}/retention", patch(update_retention))
        .route("/archive/{id}/extend", post(extend));
    Router::new().nest("/api/v1", v1).with_state(state)
}

pub async fn serve(
    addr: &str,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("api bind {addr}: {e}"))?;
    info!(addr = %addr, "api: listening on /api/v1");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("api server: {e}"))
}

/// Caller identity taken from the `x-actor-id` header.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Actor(v.to_string()))
            .ok_or(ApiError::MissingActor)
    }
}

#[derive(Debug)]
pub enum ApiError {
    MissingActor,
    Archive(ArchiveError),
}

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        ApiError::Archive(e)
    }
}

pub fn status_for(err: &ArchiveError) -> StatusCode {
    match err {
        ArchiveError::PreconditionFailed(_) | ArchiveError::Conflict(_) => StatusCode::CONFLICT,
        ArchiveError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ArchiveError::RetentionLocked { .. } => StatusCode::LOCKED,
        ArchiveError::ArchiveNotFound(_) => StatusCode::NOT_FOUND,
        ArchiveError::Storage(_) | ArchiveError::Session(_) => StatusCode::BAD_GATEWAY,
        ArchiveError::KeyUnavailable | ArchiveError::Audit(_) => StatusCode::SERVICE_UNAVAILABLE,
        ArchiveError::Integrity { .. }
        | ArchiveError::KeyDerivation(_)
        | ArchiveError::Metadata(_)
        | ArchiveError::Serialization(_)
        | ArchiveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::MissingActor => (
                StatusCode::UNAUTHORIZED,
                "missing_actor",
                format!("{ACTOR_HEADER} header required"),
            ),
            ApiError::Archive(e) => {
                let status = status_for(e);
                if status.is_server_error() {
                    error!(kind = e.kind(), "archive api: {e}");
                }
                (status, e.kind(), e.to_string())
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": kind, "message": message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn task_failed(op: &str, e: tokio::task::JoinError) -> ArchiveError {
    ArchiveError::Internal(format!("{op} task: {e}"))
}

#[derive(Debug, Deserialize)]
pub struct CreateArchiveRequest {
    pub session_id: String,
    #[serde(default)]
    pub retention_tier: Option<RetentionTier>,
}

async fn create_archive(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Json(req): Json<CreateArchiveRequest>,
) -> ApiResult<(StatusCode, Json<ArchiveView>)> {
    let tier = req.retention_tier.unwrap_or(RetentionTier::Standard);
    // runs to completion even if the client disconnects mid-request
    let manager = state.manager.clone();
    let result = tokio::spawn(async move { manager.archive(&req.session_id, tier, &actor).await })
        .await
        .unwrap_or_else(|e| Err(task_failed("archive", e)));
    state.metrics.record("archive", &result);
    Ok((StatusCode::CREATED, Json(result?.view())))
}

async fn get_archive(
    State(state): State<ApiState>,
    Actor(_actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<ArchiveView>> {
    let archive = state.manager.get_metadata(&id).await?;
    Ok(Json(archive.view()))
}

async fn download(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let result = state.manager.retrieve(&id, &actor).await;
    state.metrics.record("retrieve", &result);
    let plaintext = result?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        plaintext,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateRetentionRequest {
    pub retention_tier: RetentionTier,
}

async fn update_retention(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<UpdateRetentionRequest>,
) -> ApiResult<Json<ArchiveView>> {
    let result = state
        .manager
        .update_retention_tier(&id, req.retention_tier, &actor)
        .await;
    state.metrics.record("update_tier", &result);
    Ok(Json(result?.view()))
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub days: i64,
}

async fn extend(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> ApiResult<Json<ArchiveView>> {
    let result = state.manager.extend_retention(&id, req.days, &actor).await;
    state.metrics.record("extend", &result);
    Ok(Json(result?.view()))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default, rename = "override")]
    pub admin_override: bool,
    pub reason: Option<String>,
}

async fn delete_archive(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    let opts = DeleteOptions {
        admin_override: q.admin_override,
        reason: q.reason,
    };
    let manager = state.manager.clone();
    let result = tokio::spawn(async move { manager.delete_archive(&id, &actor, opts).await })
        .await
        .unwrap_or_else(|e| Err(task_failed("delete", e)));
    state.metrics.record("delete", &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_status(
    State(state): State<ApiState>,
    Actor(_actor): Actor,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusCheck>> {
    Ok(Json(state.manager.check_status(&session_id).await?))
}

async fn stats(State(state): State<ApiState>, Actor(_actor): Actor) -> ApiResult<Json<ArchiveStats>> {
    Ok(Json(state.manager.stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
}

async fn expiring(
    State(state): State<ApiState>,
    Actor(_actor): Actor,
    Query(q): Query<ExpiringQuery>,
) -> ApiResult<Json<Vec<ArchiveView>>> {
    let days = q.days.unwrap_or(DEFAULT_EXPIRING_DAYS);
    let archives = state.manager.expiring_within(days).await?;
    Ok(Json(archives.iter().map(|a| a.view()).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use chrono::{Duration, TimeZone, Utc};
    use prometheus_client::registry::Registry;
    use sarc_archive::{
        ManagerSettings, ManualClock, MemoryAuditSink, MemoryMetadataStore, MemorySessionStore,
        SessionRecord, SessionStatus,
    };
    use sarc_crypto::{KdfParams, MasterKey};
    use sarc_storage::{OpendalStore, RetryPolicy};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        sessions: Arc<MemorySessionStore>,
        audit: Arc<MemoryAuditSink>,
        clock: Arc<ManualClock>,
        metrics: Arc<ArchiveMetrics>,
    }

    fn fixture(with_key: bool) -> Fixture {
        let op = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let sessions = Arc::new(MemorySessionStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
        ));
        let settings = ManagerSettings {
            kdf: KdfParams::insecure_fast(),
            ..ManagerSettings::default()
        };
        let bucket = settings.bucket.clone();
        let manager = ArchiveManager::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(OpendalStore::new(RetryPolicy::default()).with_bucket(bucket, op)),
            sessions.clone(),
            audit.clone(),
            with_key.then(|| Arc::new(MasterKey::from_bytes([5u8; 32]))),
            settings,
        )
        .with_clock(clock.clone());
        let metrics = Arc::new(ArchiveMetrics::new(&mut Registry::default()));
        let app = router(ApiState {
            manager,
            metrics: metrics.clone(),
        });
        Fixture {
            app,
            sessions,
            audit,
            clock,
            metrics,
        }
    }

    fn session(id: &str, status: SessionStatus) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            status,
            opened_at: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            closed_at: (status == SessionStatus::Closed)
                .then(|| Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap()),
            data: json!({"channel": "text", "summary": "de-escalated"}),
            notes: vec![],
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            req = req.header(ACTOR_HEADER, actor);
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn call_json(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = call(app, method, uri, Some("supervisor-1"), body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(f: &Fixture, session_id: &str, tier: &str) -> Value {
        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/v1/archive",
            Some(json!({"session_id": session_id, "retention_tier": tier})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    #[tokio::test]
    async fn test_archive_download_round_trip() {
        let f = fixture(true);
        f.sessions.insert(session("s-100", SessionStatus::Closed));

        let created = create(&f, "s-100", "standard").await;
        assert_eq!(created["session_id"], "s-100");
        assert_eq!(created["status"], "stored");
        assert_eq!(created["retention_tier"], "standard");
        assert!(created.get("salt").is_none());
        let id = created["id"].as_str().unwrap().to_string();

        let (status, bytes) = call(
            &f.app,
            Method::GET,
            &format!("/api/v1/archive/{id}/download"),
            Some("auditor-2"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let payload: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["session"]["id"], "s-100");
        assert_eq!(payload["session"]["data"]["summary"], "de-escalated");

        let downloads: Vec<_> = f
            .audit
            .events()
            .into_iter()
            .filter(|e| e.action == sarc_archive::AuditAction::ArchiveDownload)
            .collect();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].actor_id, "auditor-2");
    }

    #[tokio::test]
    async fn test_missing_actor_is_rejected() {
        let f = fixture(true);
        f.sessions.insert(session("s-1", SessionStatus::Closed));
        let (status, bytes) = call(
            &f.app,
            Method::POST,
            "/api/v1/archive",
            None,
            Some(json!({"session_id": "s-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "missing_actor");
        assert!(f.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_precondition_errors() {
        let f = fixture(true);
        f.sessions.insert(session("s-open", SessionStatus::Open));
        f.sessions.insert(session("s-done", SessionStatus::Closed));

        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/v1/archive",
            Some(json!({"session_id": "s-open"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "precondition_failed");

        create(&f, "s-done", "standard").await;
        let (status, _) = call_json(
            &f.app,
            Method::POST,
            "/api/v1/archive",
            Some(json!({"session_id": "s-done"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_retention_transitions() {
        let f = fixture(true);
        f.sessions.insert(session("s-2", SessionStatus::Closed));
        let created = create(&f, "s-2", "standard").await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, ext) = call_json(
            &f.app,
            Method::POST,
            &format!("/api/v1/archive/{id}/extend"),
            Some(json!({"days": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(ext["expires_at"], created["expires_at"]);

        let (status, body) = call_json(
            &f.app,
            Method::PATCH,
            &format!("/api/v1/archive/{id}/retention"),
            Some(json!({"retention_tier": "standard"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "policy_violation");

        let (status, body) = call_json(
            &f.app,
            Method::PATCH,
            &format!("/api/v1/archive/{id}/retention"),
            Some(json!({"retention_tier": "permanent"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retention_tier"], "permanent");
        assert!(body["expires_at"].is_null());

        let (status, _) = call_json(
            &f.app,
            Method::POST,
            &format!("/api/v1/archive/{id}/extend"),
            Some(json!({"days": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        // permanent archives are locked even with an override
        let (status, body) = call_json(
            &f.app,
            Method::DELETE,
            &format!("/api/v1/archive/{id}?override=true&reason=cleanup"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::LOCKED);
        assert_eq!(body["error"], "retention_locked");
    }

    #[tokio::test]
    async fn test_delete_gating() {
        let f = fixture(true);
        f.sessions.insert(session("s-3", SessionStatus::Closed));
        let id = create(&f, "s-3", "standard").await["id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, _) =
            call_json(&f.app, Method::DELETE, &format!("/api/v1/archive/{id}"), None).await;
        assert_eq!(status, StatusCode::LOCKED);

        f.clock.advance(Duration::days(366));
        let (status, _) =
            call_json(&f.app, Method::DELETE, &format!("/api/v1/archive/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) =
            call_json(&f.app, Method::GET, &format!("/api/v1/archive/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "archive_not_found");

        let (status, body) =
            call_json(&f.app, Method::GET, "/api/v1/archive/check/s-3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["archived"], false);
    }

    #[tokio::test]
    async fn test_stats_and_expiring() {
        let f = fixture(true);
        for (sid, tier) in [("s-a", "standard"), ("s-b", "extended"), ("s-c", "permanent")] {
            f.sessions.insert(session(sid, SessionStatus::Closed));
            create(&f, sid, tier).await;
        }

        let (status, stats) = call_json(&f.app, Method::GET, "/api/v1/archive/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 3);
        assert_eq!(stats["permanent"], 1);
        assert_eq!(stats["expiring_soon"], 0);

        f.clock.advance(Duration::days(350));
        let (status, list) =
            call_json(&f.app, Method::GET, "/api/v1/archive/expiring", None).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["session_id"], "s-a");

        let (status, _) =
            call_json(&f.app, Method::GET, "/api/v1/archive/expiring?days=-1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, check) =
            call_json(&f.app, Method::GET, "/api/v1/archive/check/s-b", None).await;
        assert_eq!(check["archived"], true);
        assert_eq!(check["archive"]["retention_tier"], "extended");
    }

    #[tokio::test]
    async fn test_huge_day_counts_are_rejected() {
        let f = fixture(true);
        f.sessions.insert(session("s-9", SessionStatus::Closed));
        let created = create(&f, "s-9", "standard").await;
        let id = created["id"].as_str().unwrap().to_string();

        for uri in [
            "/api/v1/archive/expiring?days=100000000",
            "/api/v1/archive/expiring?days=9223372036854775807",
        ] {
            let (status, body) = call_json(&f.app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(body["error"], "precondition_failed");
        }

        let (status, body) = call_json(
            &f.app,
            Method::POST,
            &format!("/api/v1/archive/{id}/extend"),
            Some(json!({"days": 100_000_000})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "policy_violation");

        // the router still serves afterwards
        let (status, _) = call_json(&f.app, Method::GET, "/api/v1/archive/stats", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_master_key_is_unavailable() {
        let f = fixture(false);
        f.sessions.insert(session("s-4", SessionStatus::Closed));
        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/v1/archive",
            Some(json!({"session_id": "s-4"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "key_unavailable");
        assert_eq!(f.metrics.integrity_failures(), 0);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ArchiveError::Integrity {
                archive_id: "a".into(),
                reason: "tag".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ArchiveError::Conflict("busy".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ArchiveError::Audit("sink down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
