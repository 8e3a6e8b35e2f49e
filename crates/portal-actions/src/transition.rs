//! Purchase-order transition table.
//!
//! # Design
//!
//! Pure lookup from `(state, action)` to a [`Transition`]. Two invariants
//! live here and nowhere else:
//!
//! 1. **Fulfillment gating.** Only `mark_sent` and `cancel` move the
//!    fulfillment lifecycle, and only out of `Open | Packing | Packaged`.
//!    `acknowledge`, `add_note` and `update_delivery_date` are informational
//!    and legal from every state.
//! 2. **Write-once markers.** `acknowledged_at`, `sent_at` and `cancelled_at`
//!    are set at most once; [`TransitionTable::idempotency_violation`] names
//!    the rejection when the marker for an action is already present.
//!
//! ```text
//!   Open ─┐
//!   Packing ─┼── mark_sent ──► Sent
//!   Packaged ─┘
//!        └────── cancel ────► Cancelled
//! ```

use portal_schemas::{ActionKind, PayloadField, PoSnapshot, PoState};

use crate::error::ActionError;

/// Result of consulting the table for one `(state, action)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub allowed: bool,
    /// State after the action; `None` when the action is not allowed.
    pub next_state: Option<PoState>,
    /// Payload fields the action needs under `data`.
    pub required_fields: &'static [PayloadField],
}

impl Transition {
    fn allow(next: PoState, required_fields: &'static [PayloadField]) -> Self {
        Self {
            allowed: true,
            next_state: Some(next),
            required_fields,
        }
    }

    fn deny(required_fields: &'static [PayloadField]) -> Self {
        Self {
            allowed: false,
            next_state: None,
            required_fields,
        }
    }
}

pub struct TransitionTable;

impl TransitionTable {
    pub fn required_fields(action: ActionKind) -> &'static [PayloadField] {
        match action {
            ActionKind::Acknowledge | ActionKind::MarkSent => &[],
            ActionKind::Cancel => &[PayloadField::Reason],
            ActionKind::AddNote => &[PayloadField::Note],
            ActionKind::UpdateDeliveryDate => &[PayloadField::DeliveryDate],
        }
    }

    pub fn can_apply(state: PoState, action: ActionKind) -> Transition {
        use ActionKind::*;
        use PoState::*;

        let required = Self::required_fields(action);
        match (state, action) {
            // Informational: not gated by the fulfillment lifecycle.
            (s, Acknowledge | AddNote | UpdateDeliveryDate) => Transition::allow(s, required),

            (Open | Packing | Packaged, MarkSent) => Transition::allow(Sent, required),
            (Open | Packing | Packaged, Cancel) => Transition::allow(Cancelled, required),

            (_, MarkSent | Cancel) => Transition::deny(required),
        }
    }

    /// The write-once rule for `action`, evaluated against the loaded row.
    pub fn idempotency_violation(action: ActionKind, po: &PoSnapshot) -> Option<ActionError> {
        match action {
            ActionKind::Acknowledge if po.acknowledged_at.is_some() => {
                Some(ActionError::AlreadyAcknowledged)
            }
            ActionKind::MarkSent if po.sent_at.is_some() => Some(ActionError::AlreadySent),
            ActionKind::Cancel if po.cancelled_at.is_some() => Some(ActionError::AlreadyCancelled),
            _ => None,
        }
    }
}
