//! Request envelope and typed action payloads.
//!
//! Parsing happens in two phases. The envelope (`po_id`, `action`) is
//! checked before any row is loaded; the action-specific `data` is only
//! validated after the lock and transition checks have passed.

use chrono::NaiveDate;
use portal_schemas::{ActionKind, PayloadField};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::ActionError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// `{"po_id", "action", "data"}` after envelope validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub po_id: Uuid,
    pub action: ActionKind,
    /// Raw action payload; always a JSON object.
    pub data: Value,
}

impl ActionRequest {
    /// Checks, in order: `po_id` present, `action` present, `action` known,
    /// `po_id` well-formed. A malformed id cannot name an existing PO and is
    /// reported as `PO_NOT_FOUND`.
    pub fn from_json(body: &Value) -> Result<Self, ActionError> {
        let po_raw = non_empty_str(body, "po_id")
            .ok_or(ActionError::MissingParameter { param: "po_id" })?;
        let action_raw = non_empty_str(body, "action")
            .ok_or(ActionError::MissingParameter { param: "action" })?;

        let action: ActionKind = action_raw.parse().map_err(|_| ActionError::InvalidAction {
            action: action_raw.to_string(),
        })?;
        let po_id = Uuid::parse_str(po_raw).map_err(|_| ActionError::PoNotFound)?;

        let data = match body.get("data") {
            Some(Value::Object(m)) => Value::Object(m.clone()),
            _ => Value::Object(Map::new()),
        };

        Ok(Self {
            po_id,
            action,
            data,
        })
    }
}

fn non_empty_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// An action together with its validated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoAction {
    Acknowledge,
    MarkSent { tracking_number: Option<String> },
    Cancel { reason: String },
    AddNote { note: String },
    UpdateDeliveryDate { delivery_date: NaiveDate },
}

impl PoAction {
    /// Validate `data` for `kind`. `today` is the caller's current UTC date;
    /// a delivery date equal to today is accepted.
    pub fn from_payload(kind: ActionKind, data: &Value, today: NaiveDate) -> Result<Self, ActionError> {
        match kind {
            ActionKind::Acknowledge => Ok(PoAction::Acknowledge),
            ActionKind::MarkSent => Ok(PoAction::MarkSent {
                tracking_number: non_empty_str(data, "tracking_number").map(str::to_string),
            }),
            ActionKind::Cancel => {
                let reason = non_empty_str(data, PayloadField::Reason.as_str())
                    .ok_or(ActionError::MissingReason)?;
                Ok(PoAction::Cancel {
                    reason: reason.to_string(),
                })
            }
            ActionKind::AddNote => {
                let note = non_empty_str(data, PayloadField::Note.as_str()).ok_or(
                    ActionError::MissingParameter {
                        param: PayloadField::Note.as_str(),
                    },
                )?;
                Ok(PoAction::AddNote {
                    note: note.to_string(),
                })
            }
            ActionKind::UpdateDeliveryDate => {
                let field = PayloadField::DeliveryDate.as_str();
                let raw = match data.get(field) {
                    None | Some(Value::Null) => {
                        return Err(ActionError::MissingParameter { param: field })
                    }
                    Some(Value::String(s)) if s.trim().is_empty() => {
                        return Err(ActionError::MissingParameter { param: field })
                    }
                    Some(Value::String(s)) => s.trim().to_string(),
                    Some(other) => {
                        return Err(ActionError::InvalidDate {
                            value: other.to_string(),
                        })
                    }
                };
                let delivery_date = NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                    .map_err(|_| ActionError::InvalidDate { value: raw.clone() })?;
                if delivery_date < today {
                    return Err(ActionError::PastDate {
                        date: delivery_date,
                        today,
                    });
                }
                Ok(PoAction::UpdateDeliveryDate { delivery_date })
            }
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            PoAction::Acknowledge => ActionKind::Acknowledge,
            PoAction::MarkSent { .. } => ActionKind::MarkSent,
            PoAction::Cancel { .. } => ActionKind::Cancel,
            PoAction::AddNote { .. } => ActionKind::AddNote,
            PoAction::UpdateDeliveryDate { .. } => ActionKind::UpdateDeliveryDate,
        }
    }

    /// Free-form audit metadata for this action.
    pub fn metadata(&self) -> Value {
        match self {
            PoAction::Acknowledge => json!({}),
            PoAction::MarkSent {
                tracking_number: Some(t),
            } => json!({ "tracking_number": t }),
            PoAction::MarkSent {
                tracking_number: None,
            } => json!({}),
            PoAction::Cancel { reason } => json!({ "reason": reason }),
            PoAction::AddNote { note } => json!({ "note": note }),
            PoAction::UpdateDeliveryDate { delivery_date } => {
                json!({ "delivery_date": delivery_date.format(DATE_FORMAT).to_string() })
            }
        }
    }
}
