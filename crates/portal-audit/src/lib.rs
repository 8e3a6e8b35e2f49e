//! Purchase-order audit trail: sealing, hash-chain verification, replay.
//!
//! Every successful action produces exactly one [`AuditEvent`]. Events of one
//! PO form a hash chain (`hash_prev` → previous `hash_self`) and a snapshot
//! chain (`before` of event N equals `after` of event N-1). Folding the chain
//! reproduces the PO's current mutable fields, which is what makes the trail
//! usable as evidence rather than decoration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use portal_schemas::{ActionKind, AuditEvent, PoSnapshot};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// An audit event before it is linked into its PO's hash chain.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub po_id: Uuid,
    pub owner_id: Uuid,
    pub action: ActionKind,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub before: PoSnapshot,
    pub after: PoSnapshot,
    pub metadata: Value,
}

/// Link a draft onto the chain whose head is `hash_prev` and compute its
/// `hash_self`.
pub fn seal(draft: AuditDraft, hash_prev: Option<String>) -> Result<AuditEvent> {
    let event_id = derive_event_id(draft.po_id, draft.action, draft.after.version);
    let mut ev = AuditEvent {
        event_id,
        po_id: draft.po_id,
        owner_id: draft.owner_id,
        po_version: draft.after.version,
        action: draft.action,
        actor_id: draft.actor_id,
        occurred_at: draft.occurred_at,
        before: draft.before,
        after: draft.after,
        metadata: draft.metadata,
        hash_prev,
        hash_self: None,
    };
    ev.hash_self = Some(compute_event_hash(&ev)?);
    Ok(ev)
}

/// Deterministic event id: UUIDv5 in the PO's namespace over
/// `action:version`. A version is produced once, so the id is unique.
pub fn derive_event_id(po_id: Uuid, action: ActionKind, po_version: i64) -> Uuid {
    let name = format!("{}:{}", action.as_str(), po_version);
    Uuid::new_v5(&po_id, name.as_bytes())
}

/// SHA-256 over the canonical JSON of the event with `hash_self` cleared.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Compact JSON with object keys sorted recursively. One event == one line.
pub fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Render a history as JSON Lines.
pub fn to_jsonl(events: &[AuditEvent]) -> Result<String> {
    let mut out = String::new();
    for ev in events {
        out.push_str(&canonical_json_line(ev)?);
        out.push('\n');
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Hash chain verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { events: usize },
    /// `index` is the zero-based position of the first bad event.
    Broken { index: usize, reason: String },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid { .. })
    }
}

/// Verify the hash chain of one PO's history, oldest first.
pub fn verify_chain(events: &[AuditEvent]) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;

    for (i, ev) in events.iter().enumerate() {
        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                index: i,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        let Some(claimed) = ev.hash_self.as_ref() else {
            return Ok(VerifyResult::Broken {
                index: i,
                reason: "missing hash_self".to_string(),
            });
        };
        let recomputed = compute_event_hash(ev)?;
        if *claimed != recomputed {
            return Ok(VerifyResult::Broken {
                index: i,
                reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
            });
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid {
        events: events.len(),
    })
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Why a history cannot be folded into a consistent PO state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// `before` of this event does not match the state left by its
    /// predecessor.
    Discontinuity { index: usize, event_id: Uuid },
    /// Version did not advance by exactly one.
    VersionStep {
        index: usize,
        before: i64,
        after: i64,
    },
    /// `po_version` column disagrees with the `after` snapshot.
    VersionLabel { index: usize, label: i64, after: i64 },
    /// Events are not ordered by `occurred_at`.
    OutOfOrder { index: usize },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Discontinuity { index, event_id } => {
                write!(f, "event #{index} ({event_id}) does not continue from its predecessor")
            }
            ReplayError::VersionStep {
                index,
                before,
                after,
            } => write!(f, "event #{index} moves version {before} -> {after}"),
            ReplayError::VersionLabel {
                index,
                label,
                after,
            } => write!(f, "event #{index} labelled version {label} but snapshot says {after}"),
            ReplayError::OutOfOrder { index } => write!(f, "event #{index} is older than its predecessor"),
        }
    }
}

impl std::error::Error for ReplayError {}

/// Fold a PO's history (oldest first) into the snapshot it leaves behind.
/// An empty history folds to `None`.
pub fn replay(events: &[AuditEvent]) -> Result<Option<PoSnapshot>, ReplayError> {
    let mut current: Option<&PoSnapshot> = None;
    let mut last_at: Option<DateTime<Utc>> = None;

    for (index, ev) in events.iter().enumerate() {
        if let Some(prev) = current {
            if *prev != ev.before {
                return Err(ReplayError::Discontinuity {
                    index,
                    event_id: ev.event_id,
                });
            }
        }
        if ev.after.version != ev.before.version + 1 {
            return Err(ReplayError::VersionStep {
                index,
                before: ev.before.version,
                after: ev.after.version,
            });
        }
        if ev.po_version != ev.after.version {
            return Err(ReplayError::VersionLabel {
                index,
                label: ev.po_version,
                after: ev.after.version,
            });
        }
        if let Some(t) = last_at {
            if ev.occurred_at < t {
                return Err(ReplayError::OutOfOrder { index });
            }
        }

        last_at = Some(ev.occurred_at);
        current = Some(&ev.after);
    }

    Ok(current.cloned())
}

// ---------------------------------------------------------------------------
// Combined verification
// ---------------------------------------------------------------------------

/// Outcome of checking a PO's history against its live row.
#[derive(Debug, Clone)]
pub struct HistoryReport {
    pub chain: VerifyResult,
    pub replay: Result<Option<PoSnapshot>, ReplayError>,
    /// `true` when the fold equals `current`, or the history is empty.
    pub matches_current: bool,
}

impl HistoryReport {
    pub fn is_clean(&self) -> bool {
        self.chain.is_valid() && self.replay.is_ok() && self.matches_current
    }
}

pub fn verify_po_history(events: &[AuditEvent], current: &PoSnapshot) -> Result<HistoryReport> {
    let chain = verify_chain(events)?;
    let replay = replay(events);
    let matches_current = match &replay {
        Ok(Some(folded)) => folded == current,
        Ok(None) => true,
        Err(_) => false,
    };
    Ok(HistoryReport {
        chain,
        replay,
        matches_current,
    })
}
