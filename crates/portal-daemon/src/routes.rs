//! Axum router and all HTTP handlers for portal-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Authentication is terminated upstream: the gateway
//! forwards the caller as `x-portal-actor-id` / `x-portal-owner-id`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use portal_actions::{ActionError, ActionRequest};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    api_types::{AuditHistoryResponse, HealthResponse, StatusResponse},
    state::{uptime_secs, AppState},
};

pub const HEADER_ACTOR_ID: &str = "x-portal-actor-id";
pub const HEADER_OWNER_ID: &str = "x-portal-owner-id";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/po/action", post(po_action))
        .route("/v1/po/:po_id/audit", get(po_audit))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors and caller identity
// ---------------------------------------------------------------------------

fn error_response(err: &ActionError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_body())).into_response()
}

/// Authenticated caller as forwarded by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub actor_id: Uuid,
    pub owner_id: Uuid,
}

pub(crate) fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ActionError> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
    };
    match (read(HEADER_ACTOR_ID), read(HEADER_OWNER_ID)) {
        (Some(actor_id), Some(owner_id)) => Ok(Caller { actor_id, owner_id }),
        _ => Err(ActionError::AuthRequired),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatusResponse {
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            daemon_uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
            actions_applied: st.counters.applied(),
            actions_rejected: st.counters.rejected(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/po/action
// ---------------------------------------------------------------------------

/// Apply one supplier action.
///
/// Body: `{"po_id", "action", "data"}`. A body that is not a JSON object is
/// read as `{}` and fails envelope validation with MISSING_PARAMETER.
pub(crate) async fn po_action(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let outcome = async {
        let caller = caller_from_headers(&headers)?;
        let raw: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let req = ActionRequest::from_json(&raw)?;
        st.actions
            .apply(req.po_id, caller.owner_id, caller.actor_id, req.action, &req.data)
            .await
    }
    .await;

    st.counters.record(outcome.is_ok());
    match outcome {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/po/{po_id}/audit
// ---------------------------------------------------------------------------

/// Owner-scoped audit history, oldest first.
pub(crate) async fn po_audit(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(po_id): Path<String>,
) -> Response {
    let caller = match caller_from_headers(&headers) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let Ok(po_id) = Uuid::parse_str(&po_id) else {
        return error_response(&ActionError::PoNotFound);
    };

    match st.actions.history(po_id, caller.owner_id).await {
        Ok(events) => (StatusCode::OK, Json(AuditHistoryResponse { po_id, events })).into_response(),
        Err(e) => error_response(&e),
    }
}
