use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing how a memo cache has been used.
#[derive(Debug, Default)]
pub(crate) struct MemoStats {
    requests: AtomicU64,
    hits: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

impl MemoStats {
    /// Records a lookup. A hit found an entry for its key, whether sealed or still pending.
    pub fn record_request(&self, hit: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Release);
        }
    }

    /// Records an invocation of the memoized function.
    pub fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a computation that was sealed with an error or a panic.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters. They are loaded one by one while other callers may keep recording.
    pub fn snapshot(&self) -> StatsSnapshot {
        // A hit is counted after its request, so loading hits first keeps them below requests.
        let hits = self.hits.load(Ordering::Acquire);
        let failures = self.failures.load(Ordering::Relaxed);
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits,
            computations: self.computations.load(Ordering::Relaxed),
            failures,
        }
    }
}

/// A point in time copy of the usage counters of a memo cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Number of lookups.
    pub requests: u64,
    /// Lookups that found an existing entry for their key.
    pub hits: u64,
    /// Invocations of the memoized function.
    pub computations: u64,
    /// Computations that ended in an error or a panic.
    pub failures: u64,
}

impl StatsSnapshot {
    /// Lookups that had to register a new entry.
    pub fn misses(&self) -> u64 {
        self.requests.saturating_sub(self.hits)
    }
}
