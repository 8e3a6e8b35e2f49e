//! In-memory [`PurchaseOrderStore`] with real transaction semantics.
//!
//! - `begin` takes an exclusive gate for the lifetime of the transaction, the
//!   in-process stand-in for the Postgres row lock taken by the owner-scoped
//!   `FOR UPDATE` load. Concurrent actions therefore serialise and the loser
//!   reads the winner's committed row.
//! - Writes are staged on the transaction and published on `commit`.
//!   Dropping or rolling back a transaction discards them.
//! - Fault hooks simulate what the gate otherwise rules out: a write that
//!   lands between load and compare-and-swap, a stalled connection, and a
//!   failing audit insert.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_actions::{ApplyOutcome, PoChange, PurchaseOrderStore};
use portal_schemas::{AuditEvent, PurchaseOrder};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    pos: HashMap<Uuid, PurchaseOrder>,
    /// Commit order. Reads sort by `po_version`.
    audit: Vec<AuditEvent>,
    po_writes: u64,
    faults: Faults,
}

impl Tables {
    /// Same ordering as the Postgres history query: by `po_version`.
    fn history(&self, po_id: Uuid) -> Vec<AuditEvent> {
        let mut events: Vec<AuditEvent> =
            self.audit.iter().filter(|e| e.po_id == po_id).cloned().collect();
        events.sort_by_key(|e| e.po_version);
        events
    }
}

#[derive(Default)]
struct Faults {
    interleave_after_load: Option<Uuid>,
    write_delay: Option<Duration>,
    fail_audit_append: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    gate: Arc<Mutex<()>>,
}

/// Open transaction on a [`MemoryStore`].
pub struct MemoryTx {
    _gate: OwnedMutexGuard<()>,
    staged_pos: HashMap<Uuid, PurchaseOrder>,
    staged_audit: Vec<AuditEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Seeding and inspection (committed state only)
    // ---------------------------------------------------------------------

    pub async fn insert(&self, po: PurchaseOrder) {
        self.tables.lock().await.pos.insert(po.po_id, po);
    }

    pub async fn get(&self, po_id: Uuid) -> Option<PurchaseOrder> {
        self.tables.lock().await.pos.get(&po_id).cloned()
    }

    /// Overwrite lock metadata directly, as the external lock service would.
    pub async fn set_lock(
        &self,
        po_id: Uuid,
        locked_by: Option<Uuid>,
        locked_at: Option<DateTime<Utc>>,
        lock_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut t = self.tables.lock().await;
        let Some(po) = t.pos.get_mut(&po_id) else {
            bail!("set_lock: unknown po {po_id}");
        };
        po.locked_by = locked_by;
        po.locked_at = locked_at;
        po.lock_expires_at = lock_expires_at;
        Ok(())
    }

    /// Committed events of `po_id` in version order.
    pub async fn events(&self, po_id: Uuid) -> Vec<AuditEvent> {
        self.tables.lock().await.history(po_id)
    }

    /// Committed PO row updates since creation (seeding excluded).
    pub async fn po_writes(&self) -> u64 {
        self.tables.lock().await.po_writes
    }

    pub async fn audit_len(&self) -> usize {
        self.tables.lock().await.audit.len()
    }

    // ---------------------------------------------------------------------
    // Fault hooks
    // ---------------------------------------------------------------------

    /// After the next load of `po_id`, bump its committed version as if a
    /// writer that ignores the row lock had committed in between.
    pub async fn interleave_write_after_next_load(&self, po_id: Uuid) {
        self.tables.lock().await.faults.interleave_after_load = Some(po_id);
    }

    /// Sleep this long inside every `apply_change`.
    pub async fn delay_writes(&self, delay: Duration) {
        self.tables.lock().await.faults.write_delay = Some(delay);
    }

    pub async fn fail_next_audit_append(&self) {
        self.tables.lock().await.faults.fail_audit_append = true;
    }
}

#[async_trait]
impl PurchaseOrderStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let gate = self.gate.clone().lock_owned().await;
        Ok(MemoryTx {
            _gate: gate,
            staged_pos: HashMap::new(),
            staged_audit: Vec::new(),
        })
    }

    async fn load_for_owner(
        &self,
        tx: &mut MemoryTx,
        po_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<PurchaseOrder>> {
        let mut t = self.tables.lock().await;
        let found = tx
            .staged_pos
            .get(&po_id)
            .or_else(|| t.pos.get(&po_id))
            .filter(|po| po.owner_id == owner_id)
            .cloned();

        if found.is_some() && t.faults.interleave_after_load == Some(po_id) {
            t.faults.interleave_after_load = None;
            if let Some(po) = t.pos.get_mut(&po_id) {
                po.version += 1;
            }
        }
        Ok(found)
    }

    async fn apply_change(&self, tx: &mut MemoryTx, change: &PoChange) -> Result<ApplyOutcome> {
        let delay = self.tables.lock().await.faults.write_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let t = self.tables.lock().await;
        let current = tx
            .staged_pos
            .get(&change.po_id)
            .or_else(|| t.pos.get(&change.po_id))
            .filter(|po| po.owner_id == change.owner_id);
        let Some(current) = current else {
            return Ok(ApplyOutcome::VersionConflict);
        };
        if current.version != change.expected_version {
            return Ok(ApplyOutcome::VersionConflict);
        }

        let mut next = current.clone();
        next.apply_snapshot(&change.after, change.updated_at);
        next.version = change.expected_version + 1;
        let new_version = next.version;
        tx.staged_pos.insert(change.po_id, next);
        Ok(ApplyOutcome::Applied { new_version })
    }

    async fn last_audit_hash(&self, tx: &mut MemoryTx, po_id: Uuid) -> Result<Option<String>> {
        let t = self.tables.lock().await;
        Ok(t
            .audit
            .iter()
            .chain(tx.staged_audit.iter())
            .filter(|e| e.po_id == po_id)
            .max_by_key(|e| e.po_version)
            .and_then(|e| e.hash_self.clone()))
    }

    async fn append_audit(&self, tx: &mut MemoryTx, event: &AuditEvent) -> Result<()> {
        let mut t = self.tables.lock().await;
        if std::mem::take(&mut t.faults.fail_audit_append) {
            bail!("injected audit append failure");
        }
        if event.hash_self.is_none() {
            bail!("append_audit: event {} is not sealed", event.event_id);
        }
        let duplicate = t
            .audit
            .iter()
            .chain(tx.staged_audit.iter())
            .any(|e| e.po_id == event.po_id && e.po_version == event.po_version);
        if duplicate {
            bail!(
                "append_audit: po {} already has an event for version {}",
                event.po_id,
                event.po_version
            );
        }
        tx.staged_audit.push(event.clone());
        Ok(())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<()> {
        let MemoryTx {
            _gate,
            staged_pos,
            staged_audit,
        } = tx;
        let mut t = self.tables.lock().await;
        t.po_writes += staged_pos.len() as u64;
        t.pos.extend(staged_pos);
        t.audit.extend(staged_audit);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        drop(tx);
        Ok(())
    }

    async fn history_for_owner(
        &self,
        po_id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Vec<AuditEvent>>> {
        let t = self.tables.lock().await;
        match t.pos.get(&po_id) {
            Some(po) if po.owner_id == owner_id => Ok(Some(t.history(po_id))),
            _ => Ok(None),
        }
    }
}
