//! Shared runtime state for portal-daemon.
//!
//! Handlers receive `State<Arc<AppState>>`. No PO state is cached here: every
//! action re-reads its row inside its own transaction. The counters are
//! process-local metrics only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use portal_actions::PoActionService;
use serde::{Deserialize, Serialize};

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Default)]
pub struct ActionCounters {
    applied: AtomicU64,
    rejected: AtomicU64,
}

impl ActionCounters {
    pub fn record(&self, ok: bool) {
        let c = if ok { &self.applied } else { &self.rejected };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

pub struct AppState {
    pub build: BuildInfo,
    pub actions: Arc<dyn PoActionService>,
    pub config_hash: String,
    pub counters: ActionCounters,
}

impl AppState {
    pub fn new(actions: Arc<dyn PoActionService>, config_hash: impl Into<String>) -> Self {
        // Start the uptime clock at boot rather than at the first status call.
        uptime_secs();
        Self {
            build: BuildInfo {
                service: "portal-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            actions,
            config_hash: config_hash.into(),
            counters: ActionCounters::default(),
        }
    }
}

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
