//! Supplier purchase-order actions.
//!
//! `ActionOrchestrator::apply` is the only write path: owner-scoped load
//! under a row lock, lock guard, transition table, payload validation,
//! write-once markers, then a compare-and-swap row update and one sealed
//! audit event, all in one transaction.

pub mod audit_recorder;
pub mod clock;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod payload;
pub mod store;
pub mod transition;

pub use audit_recorder::AuditRecorder;
pub use clock::{Clock, SystemClock};
pub use error::ActionError;
pub use lock::{LockGuard, LockStatus};
pub use orchestrator::{ActionOrchestrator, ActionSummary, PoActionService};
pub use payload::{ActionRequest, PoAction};
pub use store::{ApplyOutcome, PgPurchaseOrderStore, PoChange, PurchaseOrderStore};
pub use transition::{Transition, TransitionTable};
