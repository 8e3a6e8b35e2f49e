//! Persistence seam for the orchestrator.
//!
//! The orchestrator only ever talks to a [`PurchaseOrderStore`]; the Postgres
//! implementation lives here, an in-memory one lives in `portal-testkit`.
//! Every read and write of one action goes through the same `Tx`, and
//! dropping a `Tx` without committing must discard its writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_schemas::{AuditEvent, PoSnapshot, PurchaseOrder};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// A compare-and-swap write of a PO's mutable fields.
#[derive(Debug, Clone)]
pub struct PoChange {
    pub po_id: Uuid,
    pub owner_id: Uuid,
    /// Version observed by the load in the same transaction.
    pub expected_version: i64,
    /// Full set of mutable fields to store; `after.version` is
    /// `expected_version + 1`.
    pub after: PoSnapshot,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { new_version: i64 },
    /// The stored version no longer equals `expected_version`; nothing was
    /// written.
    VersionConflict,
}

#[async_trait]
pub trait PurchaseOrderStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx>;

    /// Owner-scoped load. A PO belonging to another owner is `None`.
    async fn load_for_owner(
        &self,
        tx: &mut Self::Tx,
        po_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<PurchaseOrder>>;

    async fn apply_change(&self, tx: &mut Self::Tx, change: &PoChange) -> Result<ApplyOutcome>;

    /// `hash_self` of the PO's newest audit event.
    async fn last_audit_hash(&self, tx: &mut Self::Tx, po_id: Uuid) -> Result<Option<String>>;

    async fn append_audit(&self, tx: &mut Self::Tx, event: &AuditEvent) -> Result<()>;

    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback(&self, tx: Self::Tx) -> Result<()>;

    /// Ordered audit history, or `None` when the PO is not visible to
    /// `owner_id`. Read outside any action transaction.
    async fn history_for_owner(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Vec<AuditEvent>>>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgPurchaseOrderStore {
    pool: PgPool,
}

impl PgPurchaseOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PurchaseOrderStore for PgPurchaseOrderStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        self.pool.begin().await.context("begin transaction failed")
    }

    async fn load_for_owner(
        &self,
        tx: &mut Self::Tx,
        po_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<PurchaseOrder>> {
        portal_db::load_po_for_update(&mut **tx, po_id, owner_id).await
    }

    async fn apply_change(&self, tx: &mut Self::Tx, change: &PoChange) -> Result<ApplyOutcome> {
        let written = portal_db::update_po_if_version(
            &mut **tx,
            change.po_id,
            change.owner_id,
            change.expected_version,
            &change.after,
            change.updated_at,
        )
        .await?;

        Ok(match written {
            Some(new_version) => ApplyOutcome::Applied { new_version },
            None => ApplyOutcome::VersionConflict,
        })
    }

    async fn last_audit_hash(&self, tx: &mut Self::Tx, po_id: Uuid) -> Result<Option<String>> {
        portal_db::last_audit_hash(&mut **tx, po_id).await
    }

    async fn append_audit(&self, tx: &mut Self::Tx, event: &AuditEvent) -> Result<()> {
        portal_db::insert_po_audit_event(&mut **tx, event).await
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        tx.commit().await.context("commit failed")
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        tx.rollback().await.context("rollback failed")
    }

    async fn history_for_owner(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Vec<AuditEvent>>> {
        if portal_db::fetch_po_for_owner(&self.pool, po_id, owner_id)
            .await?
            .is_none()
        {
            return Ok(None);
        }
        let events = portal_db::fetch_audit_events(&self.pool, po_id, owner_id).await?;
        Ok(Some(events))
    }
}
