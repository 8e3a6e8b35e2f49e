//! Response types for the portal-daemon HTTP endpoints.
//!
//! The action success body is `portal_actions::ActionSummary` and the error
//! body is `ActionError::to_body()`; only daemon-specific shapes live here.

use portal_schemas::AuditEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub daemon_uptime_secs: u64,
    /// SHA-256 of the canonical effective config.
    pub config_hash: String,
    pub actions_applied: u64,
    pub actions_rejected: u64,
}

// ---------------------------------------------------------------------------
// /v1/po/{po_id}/audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditHistoryResponse {
    pub po_id: Uuid,
    pub events: Vec<AuditEvent>,
}
