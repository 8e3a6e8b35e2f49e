//! ActionOrchestrator: one supplier action, one transaction.
//!
//! Order of checks inside the transaction (first failure wins, nothing is
//! written on any rejection):
//!
//! 1. load `(po_id, owner_id)` with the row lock → `PO_NOT_FOUND`, then read
//!    the clock
//! 2. lock guard → `PO_LOCKED`
//! 3. transition table → `INVALID_STATE`
//! 4. payload → `MISSING_PARAMETER` / `MISSING_REASON` / `INVALID_DATE` / `PAST_DATE`
//! 5. write-once marker → `ALREADY_*`
//! 6. compare-and-swap write + audit append → `CONCURRENT_MODIFICATION`
//!
//! The row lock taken in step 1 serialises concurrent actions on one PO, so a
//! losing `mark_sent` re-reads the winner's committed row. From `Sent` the
//! table already refuses `mark_sent`; when the refused action's own marker is
//! set the caller gets the more precise `ALREADY_SENT` instead of
//! `INVALID_STATE`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use portal_audit::AuditDraft;
use portal_schemas::{ActionKind, AuditEvent, FieldName, PoSnapshot, PoState, PurchaseOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit_recorder::AuditRecorder;
use crate::clock::{Clock, SystemClock};
use crate::error::ActionError;
use crate::lock::{LockGuard, LockStatus};
use crate::payload::PoAction;
use crate::store::{ApplyOutcome, PoChange, PurchaseOrderStore};
use crate::transition::TransitionTable;

/// Success response of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub po_id: Uuid,
    pub action_performed: ActionKind,
    pub new_state: PoState,
    pub new_version: i64,
    pub updated_at: DateTime<Utc>,
    /// Mutable fields whose value changed, with their new value.
    pub changes_applied: BTreeMap<FieldName, Value>,
}

/// Object-safe entry point used by the HTTP and CLI surfaces.
#[async_trait]
pub trait PoActionService: Send + Sync {
    async fn apply(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
        actor_id: Uuid,
        action: ActionKind,
        payload: &Value,
    ) -> Result<ActionSummary, ActionError>;

    /// Owner-scoped audit history, oldest first.
    async fn history(&self, po_id: Uuid, owner_id: Uuid) -> Result<Vec<AuditEvent>, ActionError>;
}

pub struct ActionOrchestrator<S, C = SystemClock> {
    store: S,
    clock: C,
    tx_timeout: Duration,
}

impl<S: PurchaseOrderStore> ActionOrchestrator<S, SystemClock> {
    pub fn new(store: S, tx_timeout: Duration) -> Self {
        Self::with_clock(store, SystemClock, tx_timeout)
    }
}

impl<S: PurchaseOrderStore, C: Clock> ActionOrchestrator<S, C> {
    pub fn with_clock(store: S, clock: C, tx_timeout: Duration) -> Self {
        Self {
            store,
            clock,
            tx_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one action as `actor_id` on behalf of `owner_id`.
    ///
    /// The whole unit of work runs under `tx_timeout`; on expiry the
    /// transaction is dropped uncommitted and the caller sees
    /// `INTERNAL_ERROR`.
    pub async fn apply(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
        actor_id: Uuid,
        action: ActionKind,
        payload: &Value,
    ) -> Result<ActionSummary, ActionError> {
        let unit = self.run_transaction(po_id, owner_id, actor_id, action, payload);
        let result = match tokio::time::timeout(self.tx_timeout, unit).await {
            Ok(r) => r,
            Err(_) => Err(ActionError::internal(format!(
                "transaction exceeded {:?}",
                self.tx_timeout
            ))),
        };

        match &result {
            Ok(s) => info!(
                %po_id, %actor_id, action = %action, new_version = s.new_version,
                new_state = %s.new_state, "po/action"
            ),
            Err(e @ (ActionError::PoLocked { .. } | ActionError::ConcurrentModification { .. })) => {
                warn!(%po_id, %actor_id, action = %action, code = e.code(), "po/action rejected")
            }
            Err(ActionError::Internal { detail }) => {
                error!(%po_id, %actor_id, action = %action, detail = %detail, "po/action failed")
            }
            Err(e) => debug!(%po_id, %actor_id, action = %action, code = e.code(), "po/action rejected"),
        }
        result
    }

    pub async fn history(&self, po_id: Uuid, owner_id: Uuid) -> Result<Vec<AuditEvent>, ActionError> {
        match self.store.history_for_owner(po_id, owner_id).await {
            Ok(Some(events)) => Ok(events),
            Ok(None) => Err(ActionError::PoNotFound),
            Err(e) => {
                error!(%po_id, error = ?e, "po/history failed");
                Err(ActionError::internal(format!("{e:#}")))
            }
        }
    }

    async fn run_transaction(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
        actor_id: Uuid,
        action: ActionKind,
        payload: &Value,
    ) -> Result<ActionSummary, ActionError> {
        let mut tx = self.store.begin().await.map_err(internal)?;

        match self
            .decide_and_write(&mut tx, po_id, owner_id, actor_id, action, payload)
            .await
        {
            Ok(summary) => {
                self.store.commit(tx).await.map_err(internal)?;
                Ok(summary)
            }
            Err(rejection) => {
                if let Err(e) = self.store.rollback(tx).await {
                    // The rejection is still what the caller needs to see.
                    warn!(%po_id, error = ?e, "rollback failed");
                }
                Err(rejection)
            }
        }
    }

    async fn decide_and_write(
        &self,
        tx: &mut S::Tx,
        po_id: Uuid,
        owner_id: Uuid,
        actor_id: Uuid,
        action: ActionKind,
        payload: &Value,
    ) -> Result<ActionSummary, ActionError> {
        let po = self
            .store
            .load_for_owner(tx, po_id, owner_id)
            .await
            .map_err(internal)?
            .ok_or(ActionError::PoNotFound)?;
        // Read only once the row lock is held.
        let now = action_time(self.clock.now(), &po);
        let before = po.snapshot();

        let lock = LockGuard::evaluate(&before, now);
        if let LockStatus::HeldBy { expires_at, .. } = lock {
            if lock.blocks(actor_id) {
                return Err(ActionError::PoLocked { expires_at });
            }
        }

        let transition = TransitionTable::can_apply(before.state, action);
        let Some(next_state) = transition.next_state.filter(|_| transition.allowed) else {
            return Err(TransitionTable::idempotency_violation(action, &before).unwrap_or(
                ActionError::InvalidState {
                    current_state: before.state,
                    action,
                },
            ));
        };

        let parsed = PoAction::from_payload(action, payload, now.date_naive())?;

        if let Some(violation) = TransitionTable::idempotency_violation(action, &before) {
            return Err(violation);
        }

        let after = next_snapshot(&before, &parsed, next_state, lock, now);
        let change = PoChange {
            po_id,
            owner_id,
            expected_version: before.version,
            after: after.clone(),
            updated_at: now,
        };
        match self.store.apply_change(tx, &change).await.map_err(internal)? {
            ApplyOutcome::Applied { new_version } if new_version == after.version => {}
            ApplyOutcome::Applied { new_version } => {
                return Err(ActionError::internal(format!(
                    "store reported version {new_version}, expected {}",
                    after.version
                )));
            }
            ApplyOutcome::VersionConflict => {
                return Err(ActionError::ConcurrentModification {
                    expected_version: before.version,
                });
            }
        }

        let draft = AuditDraft {
            po_id,
            owner_id,
            action,
            actor_id,
            occurred_at: now,
            before: before.clone(),
            after: after.clone(),
            metadata: parsed.metadata(),
        };
        AuditRecorder::record(&self.store, tx, draft)
            .await
            .map_err(internal)?;

        Ok(ActionSummary {
            po_id,
            action_performed: action,
            new_state: after.state,
            new_version: after.version,
            updated_at: now,
            changes_applied: before.changed_fields(&after),
        })
    }
}

#[async_trait]
impl<S, C> PoActionService for ActionOrchestrator<S, C>
where
    S: PurchaseOrderStore,
    C: Clock,
{
    async fn apply(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
        actor_id: Uuid,
        action: ActionKind,
        payload: &Value,
    ) -> Result<ActionSummary, ActionError> {
        ActionOrchestrator::apply(self, po_id, owner_id, actor_id, action, payload).await
    }

    async fn history(&self, po_id: Uuid, owner_id: Uuid) -> Result<Vec<AuditEvent>, ActionError> {
        ActionOrchestrator::history(self, po_id, owner_id).await
    }
}

/// Event time of an action on `po`, truncated to microseconds so it survives
/// a `timestamptz` round trip. Never earlier than `updated_at_utc`, which
/// every successful action stamps with its own event time, so `occurred_at`
/// is non-decreasing along a PO's version chain.
fn action_time(clock_now: DateTime<Utc>, po: &PurchaseOrder) -> DateTime<Utc> {
    let now = clock_now.trunc_subsecs(6);
    po.updated_at_utc.map_or(now, |last| now.max(last))
}

fn internal(e: anyhow::Error) -> ActionError {
    ActionError::internal(format!("{e:#}"))
}

/// The row after `action` succeeds: one version step, the action's own
/// field, and lock columns cleared when the lock they describe is no longer
/// in force. A live lock (necessarily the actor's own) is kept.
fn next_snapshot(
    before: &PoSnapshot,
    action: &PoAction,
    next_state: PoState,
    lock: LockStatus,
    now: DateTime<Utc>,
) -> PoSnapshot {
    let mut after = before.clone();
    after.version = before.version + 1;
    after.state = next_state;

    match action {
        PoAction::Acknowledge => after.acknowledged_at = Some(now),
        PoAction::MarkSent { .. } => after.sent_at = Some(now),
        PoAction::Cancel { .. } => after.cancelled_at = Some(now),
        PoAction::UpdateDeliveryDate { delivery_date } => {
            after.expected_delivery_date = Some(*delivery_date)
        }
        PoAction::AddNote { .. } => {}
    }

    if lock == LockStatus::Free {
        after.locked_by = None;
        after.locked_at = None;
        after.lock_expires_at = None;
    }
    after
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
    }

    fn open_v3() -> PoSnapshot {
        PoSnapshot {
            state: PoState::Open,
            version: 3,
            acknowledged_at: None,
            sent_at: None,
            cancelled_at: None,
            expected_delivery_date: None,
            locked_by: None,
            locked_at: None,
            lock_expires_at: None,
        }
    }

    #[test]
    fn mark_sent_sets_marker_and_state() {
        let action = PoAction::MarkSent {
            tracking_number: None,
        };
        let after = next_snapshot(&open_v3(), &action, PoState::Sent, LockStatus::Free, now());
        assert_eq!(after.version, 4);
        assert_eq!(after.state, PoState::Sent);
        assert_eq!(after.sent_at, Some(now()));

        let keys: Vec<_> = open_v3()
            .changed_fields(&after)
            .into_keys()
            .map(|k| k.as_str())
            .collect();
        assert_eq!(keys, vec!["state", "sentAt"]);
    }

    #[test]
    fn add_note_only_bumps_version() {
        let action = PoAction::AddNote { note: "hi".into() };
        let after = next_snapshot(&open_v3(), &action, PoState::Open, LockStatus::Free, now());
        assert_eq!(after.version, 4);
        assert!(open_v3().changed_fields(&after).is_empty());
    }

    #[test]
    fn delivery_date_is_written() {
        let d = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let action = PoAction::UpdateDeliveryDate { delivery_date: d };
        let after = next_snapshot(&open_v3(), &action, PoState::Open, LockStatus::Free, now());
        assert_eq!(after.expected_delivery_date, Some(d));
    }

    #[test]
    fn action_time_never_precedes_last_write() {
        let mut po = PurchaseOrder {
            po_id: Uuid::from_u128(1),
            owner_id: Uuid::from_u128(2),
            po_number: "PO-1".into(),
            state: PoState::Open,
            version: 3,
            locked_by: None,
            locked_at: None,
            lock_expires_at: None,
            acknowledged_at: None,
            sent_at: None,
            cancelled_at: None,
            expected_delivery_date: None,
            created_at_utc: now() - ChronoDuration::days(1),
            updated_at_utc: None,
        };
        let skewed = now() + ChronoDuration::nanoseconds(1_500);
        assert_eq!(action_time(skewed, &po), now() + ChronoDuration::microseconds(1));

        po.updated_at_utc = Some(now() + ChronoDuration::seconds(5));
        assert_eq!(action_time(now(), &po), now() + ChronoDuration::seconds(5));
        assert_eq!(
            action_time(now() + ChronoDuration::minutes(1), &po),
            now() + ChronoDuration::minutes(1)
        );
    }

    #[test]
    fn expired_lock_is_cleared_live_lock_kept() {
        let holder = Uuid::from_u128(9);
        let mut before = open_v3();
        before.locked_by = Some(holder);
        before.locked_at = Some(now() - ChronoDuration::minutes(10));
        before.lock_expires_at = Some(now() - ChronoDuration::minutes(1));

        let after = next_snapshot(&before, &PoAction::Acknowledge, PoState::Open, LockStatus::Free, now());
        assert_eq!(after.locked_by, None);
        assert_eq!(after.locked_at, None);
        assert_eq!(after.lock_expires_at, None);

        before.lock_expires_at = Some(now() + ChronoDuration::minutes(1));
        let held = LockGuard::evaluate(&before, now());
        let after = next_snapshot(&before, &PoAction::Acknowledge, PoState::Open, held, now());
        assert_eq!(after.locked_by, Some(holder));
        assert_eq!(after.lock_expires_at, before.lock_expires_at);
    }
}
