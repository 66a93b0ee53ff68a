//! Cache statistics: atomic counters and snapshots

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub api_errors: u64,
    pub storage_errors: u64,
    pub set_ops: u64,
    pub delete_ops: u64,
}

impl CacheStats {
    /// Hit ratio over completed lookups (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    api_errors: AtomicU64,
    storage_errors: AtomicU64,
    set_ops: AtomicU64,
    delete_ops: AtomicU64,
}

/// Shared counter set for one cache context.
///
/// Cloning creates a new handle to the SAME counters.
#[derive(Debug, Clone, Default)]
pub struct StatsManager {
    counters: Arc<Counters>,
}

impl StatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_error(&self) {
        self.counters.api_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_error(&self) {
        self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.counters.set_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.counters.delete_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counter values
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            api_errors: self.counters.api_errors.load(Ordering::Relaxed),
            storage_errors: self.counters.storage_errors.load(Ordering::Relaxed),
            set_ops: self.counters.set_ops.load(Ordering::Relaxed),
            delete_ops: self.counters.delete_ops.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.counters.requests.store(0, Ordering::Relaxed);
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.evictions.store(0, Ordering::Relaxed);
        self.counters.api_errors.store(0, Ordering::Relaxed);
        self.counters.storage_errors.store(0, Ordering::Relaxed);
        self.counters.set_ops.store(0, Ordering::Relaxed);
        self.counters.delete_ops.store(0, Ordering::Relaxed);
    }
}
