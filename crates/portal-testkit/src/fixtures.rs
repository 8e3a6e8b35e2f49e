use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use portal_actions::{ActionOrchestrator, Clock};
use portal_schemas::{PoState, PurchaseOrder};
use uuid::Uuid;

use crate::memory_store::MemoryStore;

/// Default orchestrator timeout for in-memory scenarios.
pub const TEST_TX_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed reference instant for scenarios: 2026-06-01T10:00:00Z.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Settable clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    micros: Arc<AtomicI64>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(now.timestamp_micros())),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.micros.store(now.timestamp_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        let step = by.num_microseconds().unwrap_or(i64::MAX);
        self.micros.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// `Open`, version 3, no lock, no markers. Matches the happy-path scenario.
pub fn open_po(po_id: Uuid, owner_id: Uuid) -> PurchaseOrder {
    po_in_state(po_id, owner_id, PoState::Open, 3)
}

pub fn po_in_state(po_id: Uuid, owner_id: Uuid, state: PoState, version: i64) -> PurchaseOrder {
    PurchaseOrder {
        po_id,
        owner_id,
        po_number: format!("PO-{:04}", po_id.as_u128() % 10_000),
        state,
        version,
        locked_by: None,
        locked_at: None,
        lock_expires_at: None,
        acknowledged_at: None,
        sent_at: None,
        cancelled_at: None,
        expected_delivery_date: None,
        created_at_utc: t0() - chrono::Duration::days(7),
        updated_at_utc: None,
    }
}

/// A store, a clock at [`t0`], and an orchestrator wired to both.
pub struct Harness {
    pub store: MemoryStore,
    pub clock: FixedClock,
    pub orchestrator: ActionOrchestrator<MemoryStore, FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(TEST_TX_TIMEOUT)
    }

    pub fn with_timeout(tx_timeout: Duration) -> Self {
        let store = MemoryStore::new();
        let clock = FixedClock::at(t0());
        let orchestrator = ActionOrchestrator::with_clock(store.clone(), clock.clone(), tx_timeout);
        Self {
            store,
            clock,
            orchestrator,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
