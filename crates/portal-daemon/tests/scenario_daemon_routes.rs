//! In-process scenario tests for portal-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot` with the action
//! service backed by the in-memory store; no socket, no database.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use portal_daemon::{routes, state};
use portal_schemas::PoState;
use portal_testkit::{open_po, po_in_state, Harness, MemoryStore};
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

const OWNER: Uuid = Uuid::from_u128(0x77);
const ACTOR: Uuid = Uuid::from_u128(0x7A);
const PO: Uuid = Uuid::from_u128(0x7001);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Router over a fresh harness with one `Open` v3 PO owned by OWNER.
async fn make_router() -> (axum::Router, MemoryStore) {
    let h = Harness::new();
    h.store.insert(open_po(PO, OWNER)).await;
    let store = h.store.clone();
    let st = Arc::new(state::AppState::new(Arc::new(h.orchestrator), "test-hash"));
    (routes::build_router(st), store)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body: bytes::Bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = serde_json::from_slice(&body).expect("body is not valid JSON");
    (status, json)
}

fn action_req(owner: Option<Uuid>, actor: Option<Uuid>, body: Value) -> Request<axum::body::Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri("/v1/po/action")
        .header("content-type", "application/json");
    if let Some(o) = owner {
        b = b.header(routes::HEADER_OWNER_ID, o.to_string());
    }
    if let Some(a) = actor {
        b = b.header(routes::HEADER_ACTOR_ID, a.to_string());
    }
    b.body(axum::body::Body::from(body.to_string())).unwrap()
}

fn get_req(uri: &str, owner: Uuid) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(routes::HEADER_OWNER_ID, owner.to_string())
        .header(routes::HEADER_ACTOR_ID, ACTOR.to_string())
        .body(axum::body::Body::empty())
        .unwrap()
}

// ---------------------------------------------------------------------------
// GET /v1/health, /v1/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (router, _) = make_router().await;
    let (status, json) = call(router, get_req("/v1/health", OWNER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "portal-daemon");
}

#[tokio::test]
async fn status_reports_config_hash_and_counters() {
    let (router, _) = make_router().await;

    let ok = action_req(
        Some(OWNER),
        Some(ACTOR),
        json!({"po_id": PO.to_string(), "action": "acknowledge"}),
    );
    let (status, _) = call(router.clone(), ok).await;
    assert_eq!(status, StatusCode::OK);

    let bad = action_req(Some(OWNER), Some(ACTOR), json!({"action": "acknowledge"}));
    let (status, _) = call(router.clone(), bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = call(router, get_req("/v1/status", OWNER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["config_hash"], "test-hash");
    assert_eq!(json["actions_applied"], 1);
    assert_eq!(json["actions_rejected"], 1);
}

// ---------------------------------------------------------------------------
// POST /v1/po/action
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mark_sent_returns_summary_shape() {
    let (router, store) = make_router().await;
    let req = action_req(
        Some(OWNER),
        Some(ACTOR),
        json!({
            "po_id": PO.to_string(),
            "action": "mark_sent",
            "data": {"tracking_number": "TRK123"}
        }),
    );
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);

    let obj = json.as_object().expect("object body");
    let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "action_performed",
            "changes_applied",
            "new_state",
            "new_version",
            "po_id",
            "updated_at"
        ]
    );
    assert_eq!(json["po_id"], PO.to_string());
    assert_eq!(json["action_performed"], "mark_sent");
    assert_eq!(json["new_state"], "Sent");
    assert_eq!(json["new_version"], 4);
    assert_eq!(json["changes_applied"]["state"], "Sent");
    assert!(json["changes_applied"]["sentAt"].is_string());

    assert_eq!(store.get(PO).await.unwrap().state, PoState::Sent);
}

#[tokio::test]
async fn missing_identity_is_401() {
    let (router, store) = make_router().await;
    let req = action_req(
        Some(OWNER),
        None,
        json!({"po_id": PO.to_string(), "action": "acknowledge"}),
    );
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "AUTH_REQUIRED");
    assert_eq!(store.audit_len().await, 0);
}

#[tokio::test]
async fn envelope_errors_map_to_400_and_404() {
    let (router, _) = make_router().await;

    let cases = [
        (json!({"action": "acknowledge"}), StatusCode::BAD_REQUEST, "MISSING_PARAMETER"),
        (json!({"po_id": PO.to_string()}), StatusCode::BAD_REQUEST, "MISSING_PARAMETER"),
        (
            json!({"po_id": PO.to_string(), "action": "ship_it"}),
            StatusCode::BAD_REQUEST,
            "INVALID_ACTION",
        ),
        (
            json!({"po_id": "PO-12345", "action": "acknowledge"}),
            StatusCode::NOT_FOUND,
            "PO_NOT_FOUND",
        ),
    ];
    for (body, want_status, want_code) in cases {
        let (status, json) =
            call(router.clone(), action_req(Some(OWNER), Some(ACTOR), body.clone())).await;
        assert_eq!(status, want_status, "{body}");
        assert_eq!(json["code"], want_code, "{body}");
        assert!(json["message"].is_string());
    }

    let (_, json) = call(
        router,
        action_req(Some(OWNER), Some(ACTOR), json!({"action": "cancel"})),
    )
    .await;
    assert_eq!(json["parameter"], "po_id");
}

#[tokio::test]
async fn non_json_body_is_missing_parameter() {
    let (router, _) = make_router().await;
    let req = Request::builder()
        .method("POST")
        .uri("/v1/po/action")
        .header(routes::HEADER_OWNER_ID, OWNER.to_string())
        .header(routes::HEADER_ACTOR_ID, ACTOR.to_string())
        .body(axum::body::Body::from("po_id=1&action=cancel"))
        .unwrap();
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "MISSING_PARAMETER");
}

#[tokio::test]
async fn business_rejections_are_409_with_context() {
    let h = Harness::new();
    let sent = Uuid::from_u128(0x7002);
    h.store.insert(po_in_state(sent, OWNER, PoState::Sent, 4)).await;
    let st = Arc::new(state::AppState::new(Arc::new(h.orchestrator), "h"));
    let router = routes::build_router(st);

    let req = action_req(
        Some(OWNER),
        Some(ACTOR),
        json!({"po_id": sent.to_string(), "action": "cancel", "data": {"reason": "customer request"}}),
    );
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "INVALID_STATE");
    assert_eq!(json["current_state"], "Sent");
}

#[tokio::test]
async fn foreign_owner_gets_404() {
    let (router, _) = make_router().await;
    let req = action_req(
        Some(Uuid::from_u128(0x99)),
        Some(ACTOR),
        json!({"po_id": PO.to_string(), "action": "acknowledge"}),
    );
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "PO_NOT_FOUND");
}

// ---------------------------------------------------------------------------
// GET /v1/po/{po_id}/audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_history_is_owner_scoped() {
    let (router, _) = make_router().await;
    for note in ["first", "second"] {
        let req = action_req(
            Some(OWNER),
            Some(ACTOR),
            json!({"po_id": PO.to_string(), "action": "add_note", "data": {"note": note}}),
        );
        let (status, _) = call(router.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
    }

    let uri = format!("/v1/po/{PO}/audit");
    let (status, json) = call(router.clone(), get_req(&uri, OWNER)).await;
    assert_eq!(status, StatusCode::OK);
    let events = json["events"].as_array().expect("events array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["metadata"]["note"], "first");
    assert_eq!(events[1]["po_version"], 5);

    let (status, json) = call(router.clone(), get_req(&uri, Uuid::from_u128(0x99))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "PO_NOT_FOUND");

    let (status, _) = call(router, get_req("/v1/po/not-a-uuid/audit", OWNER)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
