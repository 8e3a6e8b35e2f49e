//! Shared types for the supplier portal purchase-order subsystem.
//!
//! Everything here is plain data: `Serialize + Deserialize`, no I/O and no
//! business rules. The rules live in `portal-actions`; persistence lives in
//! `portal-db`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UnknownValue
// ---------------------------------------------------------------------------

/// Returned when a stored or submitted string is not a member of one of the
/// closed enumerations below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownValue {}

// ---------------------------------------------------------------------------
// PoState
// ---------------------------------------------------------------------------

/// Fulfillment lifecycle position of a purchase order. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PoState {
    Open,
    Packing,
    Packaged,
    Sent,
    Receiving,
    Partial,
    Received,
    Closed,
    Cancelled,
    Draft,
    Archived,
}

impl PoState {
    pub const ALL: [PoState; 11] = [
        PoState::Open,
        PoState::Packing,
        PoState::Packaged,
        PoState::Sent,
        PoState::Receiving,
        PoState::Partial,
        PoState::Received,
        PoState::Closed,
        PoState::Cancelled,
        PoState::Draft,
        PoState::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoState::Open => "Open",
            PoState::Packing => "Packing",
            PoState::Packaged => "Packaged",
            PoState::Sent => "Sent",
            PoState::Receiving => "Receiving",
            PoState::Partial => "Partial",
            PoState::Received => "Received",
            PoState::Closed => "Closed",
            PoState::Cancelled => "Cancelled",
            PoState::Draft => "Draft",
            PoState::Archived => "Archived",
        }
    }
}

impl FromStr for PoState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoState::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "po state",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for PoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// The five supplier actions, without their payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Acknowledge,
    MarkSent,
    Cancel,
    AddNote,
    UpdateDeliveryDate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Acknowledge,
        ActionKind::MarkSent,
        ActionKind::Cancel,
        ActionKind::AddNote,
        ActionKind::UpdateDeliveryDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Acknowledge => "acknowledge",
            ActionKind::MarkSent => "mark_sent",
            ActionKind::Cancel => "cancel",
            ActionKind::AddNote => "add_note",
            ActionKind::UpdateDeliveryDate => "update_delivery_date",
        }
    }
}

impl FromStr for ActionKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "action",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

/// Mutable purchase-order fields, as reported in `changes_applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    State,
    AcknowledgedAt,
    SentAt,
    CancelledAt,
    ExpectedDeliveryDate,
    LockedBy,
    LockedAt,
    LockExpiresAt,
}

impl FieldName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::State => "state",
            FieldName::AcknowledgedAt => "acknowledgedAt",
            FieldName::SentAt => "sentAt",
            FieldName::CancelledAt => "cancelledAt",
            FieldName::ExpectedDeliveryDate => "expectedDeliveryDate",
            FieldName::LockedBy => "lockedBy",
            FieldName::LockedAt => "lockedAt",
            FieldName::LockExpiresAt => "lockExpiresAt",
        }
    }
}

/// Request payload fields an action may require under `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    Reason,
    Note,
    DeliveryDate,
}

impl PayloadField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadField::Reason => "reason",
            PayloadField::Note => "note",
            PayloadField::DeliveryDate => "delivery_date",
        }
    }
}

// ---------------------------------------------------------------------------
// PoSnapshot
// ---------------------------------------------------------------------------

/// Every mutable field of a purchase order at one point in time.
///
/// Audit events carry a `before` and an `after` snapshot; folding the
/// `after` snapshots of a PO's history reproduces its current row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoSnapshot {
    pub state: PoState,
    pub version: i64,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl PoSnapshot {
    /// Fields whose value differs between `self` (before) and `after`, keyed
    /// by field name with the new value. `version` is not a field delta; it
    /// is reported separately.
    pub fn changed_fields(&self, after: &PoSnapshot) -> BTreeMap<FieldName, Value> {
        let mut out = BTreeMap::new();
        if self.state != after.state {
            out.insert(FieldName::State, json_of(&after.state));
        }
        if self.acknowledged_at != after.acknowledged_at {
            out.insert(FieldName::AcknowledgedAt, json_of(&after.acknowledged_at));
        }
        if self.sent_at != after.sent_at {
            out.insert(FieldName::SentAt, json_of(&after.sent_at));
        }
        if self.cancelled_at != after.cancelled_at {
            out.insert(FieldName::CancelledAt, json_of(&after.cancelled_at));
        }
        if self.expected_delivery_date != after.expected_delivery_date {
            out.insert(
                FieldName::ExpectedDeliveryDate,
                json_of(&after.expected_delivery_date),
            );
        }
        if self.locked_by != after.locked_by {
            out.insert(FieldName::LockedBy, json_of(&after.locked_by));
        }
        if self.locked_at != after.locked_at {
            out.insert(FieldName::LockedAt, json_of(&after.locked_at));
        }
        if self.lock_expires_at != after.lock_expires_at {
            out.insert(FieldName::LockExpiresAt, json_of(&after.lock_expires_at));
        }
        out
    }
}

// Serializing these primitives cannot fail; Null is unreachable in practice.
fn json_of<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// PurchaseOrder
// ---------------------------------------------------------------------------

/// A purchase order row as loaded for its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub po_id: Uuid,
    pub owner_id: Uuid,
    pub po_number: String,
    pub state: PoState,
    pub version: i64,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: Option<DateTime<Utc>>,
}

impl PurchaseOrder {
    pub fn snapshot(&self) -> PoSnapshot {
        PoSnapshot {
            state: self.state,
            version: self.version,
            acknowledged_at: self.acknowledged_at,
            sent_at: self.sent_at,
            cancelled_at: self.cancelled_at,
            expected_delivery_date: self.expected_delivery_date,
            locked_by: self.locked_by,
            locked_at: self.locked_at,
            lock_expires_at: self.lock_expires_at,
        }
    }

    /// Overwrite the mutable fields from a snapshot; identity and creation
    /// metadata are untouched.
    pub fn apply_snapshot(&mut self, snap: &PoSnapshot, updated_at_utc: DateTime<Utc>) {
        self.state = snap.state;
        self.version = snap.version;
        self.acknowledged_at = snap.acknowledged_at;
        self.sent_at = snap.sent_at;
        self.cancelled_at = snap.cancelled_at;
        self.expected_delivery_date = snap.expected_delivery_date;
        self.locked_by = snap.locked_by;
        self.locked_at = snap.locked_at;
        self.lock_expires_at = snap.lock_expires_at;
        self.updated_at_utc = Some(updated_at_utc);
    }
}

/// Insert shape for a purchase order created outside this subsystem
/// (order intake, fixtures).
#[derive(Debug, Clone)]
pub struct NewPurchaseOrder {
    pub po_id: Uuid,
    pub owner_id: Uuid,
    pub po_number: String,
    pub state: PoState,
    pub version: i64,
    pub expected_delivery_date: Option<NaiveDate>,
    pub created_at_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

/// One successful action against one purchase order. Append-only.
///
/// `hash_prev` links to the previous event of the same PO; `hash_self` is the
/// SHA-256 of the canonical JSON of this event with `hash_self` cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub po_id: Uuid,
    pub owner_id: Uuid,
    /// Version of the PO after this event was applied.
    pub po_version: i64,
    pub action: ActionKind,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub before: PoSnapshot,
    pub after: PoSnapshot,
    pub metadata: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}
