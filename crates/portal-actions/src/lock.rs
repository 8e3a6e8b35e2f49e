//! Interpretation of the time-boxed exclusive hold on a purchase order.
//!
//! Acquisition happens elsewhere; this module only decides whether the
//! `locked_by` / `lock_expires_at` pair currently means anything.

use chrono::{DateTime, Utc};
use portal_schemas::PoSnapshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    HeldBy {
        actor_id: Uuid,
        expires_at: DateTime<Utc>,
    },
}

impl LockStatus {
    /// `true` when the PO is held by someone other than `actor_id`.
    pub fn blocks(&self, actor_id: Uuid) -> bool {
        matches!(self, LockStatus::HeldBy { actor_id: holder, .. } if *holder != actor_id)
    }
}

pub struct LockGuard;

impl LockGuard {
    /// Held iff `locked_by` is set and `lock_expires_at` is strictly after
    /// `now`. Stale holder columns on an expired or expiry-less lock are
    /// ignored.
    pub fn evaluate(po: &PoSnapshot, now: DateTime<Utc>) -> LockStatus {
        match (po.locked_by, po.lock_expires_at) {
            (Some(actor_id), Some(expires_at)) if expires_at > now => LockStatus::HeldBy {
                actor_id,
                expires_at,
            },
            _ => LockStatus::Free,
        }
    }
}
