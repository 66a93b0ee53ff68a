//! TTL management: default and per-type freshness windows

use crate::key::ItemKey;
use crate::metadata::{ItemMetadata, now_millis};
use std::collections::HashMap;
use std::time::Duration;

/// TTL configuration.
///
/// A zero or absent TTL disables freshness checks entirely.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
    /// Default item TTL
    pub default_ttl: Option<Duration>,
    /// Per key-type overrides, keyed by `kt`
    pub per_type_ttl: HashMap<String, Duration>,
    /// TTL applied to memoized query results
    pub query_ttl: Option<Duration>,
}

/// Validates item freshness and stamps metadata lifecycle times
#[derive(Debug, Clone, Default)]
pub struct TtlManager {
    config: TtlConfig,
}

impl TtlManager {
    pub fn new(config: TtlConfig) -> Self {
        Self { config }
    }

    /// A manager that never rejects a read
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.default_ttl().is_some() || !self.config.per_type_ttl.is_empty()
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.config.default_ttl.filter(|d| !d.is_zero())
    }

    pub fn query_ttl(&self) -> Option<Duration> {
        self.config.query_ttl.filter(|d| !d.is_zero())
    }

    /// Effective TTL for a key type: the per-type override, else the default
    pub fn ttl_for(&self, kt: &str) -> Option<Duration> {
        self.config
            .per_type_ttl
            .get(kt)
            .copied()
            .filter(|d| !d.is_zero())
            .or_else(|| self.default_ttl())
    }

    /// True iff the item is still fresh under its effective TTL
    pub fn validate_item(&self, key: &ItemKey, metadata: &ItemMetadata) -> bool {
        match self.ttl_for(key.kt()) {
            None => true,
            Some(ttl) => {
                let age = now_millis().saturating_sub(metadata.added_at);
                age < ttl.as_millis() as u64
            }
        }
    }

    /// Lifecycle hook: stamp insert time for a new or replaced entry
    pub fn on_item_added(&self, metadata: &mut ItemMetadata) {
        metadata.added_at = now_millis();
        metadata.last_accessed_at = metadata.added_at;
    }

    /// Lifecycle hook: stamp access time and bump the counter
    pub fn on_item_accessed(&self, metadata: &mut ItemMetadata) {
        metadata.touch();
    }
}
