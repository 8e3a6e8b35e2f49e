//! Typed rejections of the purchase-order action subsystem.
//!
//! Every variant is terminal for the request: the transaction is rolled back,
//! the PO's state and version are untouched, and nothing is retried here.
//! `PoLocked` and `ConcurrentModification` are the two the caller is expected
//! to retry after re-reading.

use chrono::{DateTime, NaiveDate, Utc};
use portal_schemas::{ActionKind, PoState};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("authentication required")]
    AuthRequired,

    #[error("missing required parameter: {param}")]
    MissingParameter { param: &'static str },

    #[error("unknown action: {action:?}")]
    InvalidAction { action: String },

    /// Also returned for a PO owned by a different supplier.
    #[error("purchase order not found")]
    PoNotFound,

    #[error("purchase order is locked by another user until {expires_at}")]
    PoLocked { expires_at: DateTime<Utc> },

    #[error("action {action} is not allowed while the purchase order is {current_state}")]
    InvalidState {
        current_state: PoState,
        action: ActionKind,
    },

    #[error("purchase order has already been acknowledged")]
    AlreadyAcknowledged,

    #[error("purchase order has already been marked as sent")]
    AlreadySent,

    #[error("purchase order has already been cancelled")]
    AlreadyCancelled,

    #[error("a cancellation reason is required")]
    MissingReason,

    #[error("invalid date {value:?}; expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("delivery date {date} is before today ({today})")]
    PastDate { date: NaiveDate, today: NaiveDate },

    #[error("purchase order was modified concurrently; reload and retry")]
    ConcurrentModification { expected_version: i64 },

    /// `detail` is for logs only and never leaves the process.
    #[error("internal error")]
    Internal { detail: String },
}

impl ActionError {
    pub fn internal(detail: impl Into<String>) -> Self {
        ActionError::Internal {
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::AuthRequired => "AUTH_REQUIRED",
            ActionError::MissingParameter { .. } => "MISSING_PARAMETER",
            ActionError::InvalidAction { .. } => "INVALID_ACTION",
            ActionError::PoNotFound => "PO_NOT_FOUND",
            ActionError::PoLocked { .. } => "PO_LOCKED",
            ActionError::InvalidState { .. } => "INVALID_STATE",
            ActionError::AlreadyAcknowledged => "ALREADY_ACKNOWLEDGED",
            ActionError::AlreadySent => "ALREADY_SENT",
            ActionError::AlreadyCancelled => "ALREADY_CANCELLED",
            ActionError::MissingReason => "MISSING_REASON",
            ActionError::InvalidDate { .. } => "INVALID_DATE",
            ActionError::PastDate { .. } => "PAST_DATE",
            ActionError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            ActionError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ActionError::AuthRequired => 401,
            ActionError::MissingParameter { .. }
            | ActionError::InvalidAction { .. }
            | ActionError::MissingReason
            | ActionError::InvalidDate { .. }
            | ActionError::PastDate { .. } => 400,
            ActionError::PoNotFound => 404,
            ActionError::PoLocked { .. }
            | ActionError::InvalidState { .. }
            | ActionError::AlreadyAcknowledged
            | ActionError::AlreadySent
            | ActionError::AlreadyCancelled
            | ActionError::ConcurrentModification { .. } => 409,
            ActionError::Internal { .. } => 500,
        }
    }

    /// Caller may succeed by re-reading and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::PoLocked { .. } | ActionError::ConcurrentModification { .. }
        )
    }

    /// Extra fields merged into the error body next to `code` and `message`.
    pub fn context(&self) -> Map<String, Value> {
        let mut m = Map::new();
        match self {
            ActionError::MissingParameter { param } => {
                m.insert("parameter".into(), json!(param));
            }
            ActionError::InvalidAction { action } => {
                m.insert("action".into(), json!(action));
            }
            ActionError::PoLocked { expires_at } => {
                m.insert("lock_expires_at".into(), json!(expires_at));
            }
            ActionError::InvalidState {
                current_state,
                action,
            } => {
                m.insert("current_state".into(), json!(current_state));
                m.insert("action".into(), json!(action));
            }
            ActionError::InvalidDate { value } => {
                m.insert("value".into(), json!(value));
            }
            ActionError::PastDate { date, today } => {
                m.insert("delivery_date".into(), json!(date));
                m.insert("today".into(), json!(today));
            }
            ActionError::ConcurrentModification { expected_version } => {
                m.insert("expected_version".into(), json!(expected_version));
            }
            _ => {}
        }
        if self.is_retryable() {
            m.insert("retryable".into(), Value::Bool(true));
        }
        m
    }

    /// `{"code", "message", ...context}`.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("code".into(), json!(self.code()));
        body.insert("message".into(), json!(self.to_string()));
        body.extend(self.context());
        Value::Object(body)
    }
}
