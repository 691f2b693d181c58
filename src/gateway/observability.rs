use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub rejected: u64,
    pub committed: u64,
    pub provider_failures: u64,
    pub refunded: u64,
    pub escalated: u64,
}

#[derive(Debug, Default)]
pub struct Observability {
    requests: AtomicU64,
    rejected: AtomicU64,
    committed: AtomicU64,
    provider_failures: AtomicU64,
    refunded: AtomicU64,
    escalated: AtomicU64,
}

impl Observability {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refunded(&self) {
        self.refunded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalated(&self) {
        self.escalated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            refunded: self.refunded.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
        }
    }
}
