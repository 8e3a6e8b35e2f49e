//! A supplier can neither see nor mutate another supplier's PO, and cannot
//! tell it apart from a PO that does not exist.

use chrono::Duration;
use portal_actions::ActionError;
use portal_schemas::{ActionKind, PoState};
use portal_testkit::{open_po, po_in_state, t0, Harness};
use serde_json::json;
use uuid::Uuid;

const OWNER: Uuid = Uuid::from_u128(0x0D);
const INTRUDER_OWNER: Uuid = Uuid::from_u128(0x0E);
const INTRUDER: Uuid = Uuid::from_u128(0xE1);

#[tokio::test]
async fn foreign_po_is_indistinguishable_from_missing() {
    let h = Harness::new();
    let po_id = Uuid::from_u128(0x4004);
    h.store.insert(open_po(po_id, OWNER)).await;

    for action in ActionKind::ALL {
        let foreign = h
            .orchestrator
            .apply(po_id, INTRUDER_OWNER, INTRUDER, action, &json!({}))
            .await
            .unwrap_err();
        let missing = h
            .orchestrator
            .apply(Uuid::from_u128(0xDEAD), INTRUDER_OWNER, INTRUDER, action, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(foreign, ActionError::PoNotFound, "{action}");
        assert_eq!(foreign.to_body(), missing.to_body(), "{action}");
    }

    assert_eq!(h.store.po_writes().await, 0);
    assert_eq!(h.store.audit_len().await, 0);
}

#[tokio::test]
async fn ownership_is_checked_before_lock_and_state() {
    let h = Harness::new();
    let po_id = Uuid::from_u128(0x4005);
    h.store
        .insert(po_in_state(po_id, OWNER, PoState::Closed, 12))
        .await;
    h.store
        .set_lock(
            po_id,
            Some(Uuid::from_u128(0xD1)),
            Some(t0()),
            Some(t0() + Duration::minutes(10)),
        )
        .await
        .unwrap();

    // Locked and in a state where cancel is invalid: still PO_NOT_FOUND.
    let err = h
        .orchestrator
        .apply(
            po_id,
            INTRUDER_OWNER,
            INTRUDER,
            ActionKind::Cancel,
            &json!({"reason": "probe"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ActionError::PoNotFound);
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn foreign_history_is_hidden() {
    let h = Harness::new();
    let po_id = Uuid::from_u128(0x4006);
    h.store.insert(open_po(po_id, OWNER)).await;
    h.orchestrator
        .apply(po_id, OWNER, Uuid::from_u128(0xD2), ActionKind::Acknowledge, &json!({}))
        .await
        .unwrap();

    let mine = h.orchestrator.history(po_id, OWNER).await.unwrap();
    assert_eq!(mine.len(), 1);

    let err = h
        .orchestrator
        .history(po_id, INTRUDER_OWNER)
        .await
        .unwrap_err();
    assert_eq!(err, ActionError::PoNotFound);
}
