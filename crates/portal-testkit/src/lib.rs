//! Test support for the purchase-order action subsystem: an in-memory store
//! with transactional semantics, a settable clock, and PO fixtures.

pub mod fixtures;
pub mod memory_store;

pub use fixtures::{open_po, po_in_state, t0, FixedClock, Harness, TEST_TX_TIMEOUT};
pub use memory_store::{MemoryStore, MemoryTx};
