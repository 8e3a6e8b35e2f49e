use anyhow::Result;
use portal_audit::AuditDraft;
use portal_schemas::AuditEvent;

use crate::store::PurchaseOrderStore;

/// Appends one sealed audit event inside the caller's transaction.
///
/// Must run after the PO row has been loaded (and locked) in `tx`, so the
/// chain head read here cannot move before the append.
pub struct AuditRecorder;

impl AuditRecorder {
    pub async fn record<S: PurchaseOrderStore>(
        store: &S,
        tx: &mut S::Tx,
        draft: AuditDraft,
    ) -> Result<AuditEvent> {
        let head = store.last_audit_hash(tx, draft.po_id).await?;
        let event = portal_audit::seal(draft, head)?;
        store.append_audit(tx, &event).await?;
        Ok(event)
    }
}
