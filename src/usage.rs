//! Traffic accounting counters.
//!
//! Counters are relaxed atomics: updates are additive and commutative, and
//! they are never read under a lock on the forwarding path.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic incoming/outgoing byte counters for one accounting domain
/// (the proxy itself, or one upstream proxy).
#[derive(Debug, Default)]
pub struct Usage {
    incoming: AtomicU64,
    outgoing: AtomicU64,
}

/// Point-in-time copy of a [`Usage`], suitable for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub incoming: u64,
    pub outgoing: u64,
}

impl Usage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes received from peers.
    pub fn add_incoming(&self, n: u64) {
        self.incoming.fetch_add(n, Ordering::Relaxed);
    }

    /// Add bytes sent to peers.
    pub fn add_outgoing(&self, n: u64) {
        self.outgoing.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incoming(&self) -> u64 {
        self.incoming.load(Ordering::Relaxed)
    }

    pub fn outgoing(&self) -> u64 {
        self.outgoing.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            incoming: self.incoming(),
            outgoing: self.outgoing(),
        }
    }
}
