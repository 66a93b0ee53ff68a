//! Per-item usage metadata and size accounting types

use crate::key::ItemKey;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Usage metadata kept for every live item.
///
/// Created on insert, updated on every read/write, dropped on delete. The
/// optional frequency fields belong to eviction strategies that track
/// decayed or sketched access frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub key: ItemKey,
    pub added_at: u64,
    pub last_accessed_at: u64,
    pub access_count: u64,
    pub estimated_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_frequency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_frequency_update: Option<u64>,
}

impl ItemMetadata {
    /// Fresh metadata for a newly inserted item
    pub fn new(key: ItemKey, estimated_size: usize) -> Self {
        let now = now_millis();
        Self {
            key,
            added_at: now,
            last_accessed_at: now,
            access_count: 0,
            estimated_size,
            raw_frequency: None,
            frequency_score: None,
            last_frequency_update: None,
        }
    }

    /// Record an access: stamp the access time and bump the counter
    pub fn touch(&mut self) {
        self.last_accessed_at = now_millis();
        self.access_count += 1;
    }

    /// Refresh for a replacing `set`: new size and insert stamp, counters kept
    pub fn replaced(&mut self, estimated_size: usize) {
        self.added_at = now_millis();
        self.estimated_size = estimated_size;
    }
}

/// Current occupancy of a cache map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSize {
    pub item_count: usize,
    pub size_bytes: usize,
}

/// Configured bounds of a cache map; `None` means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub max_items: Option<usize>,
    pub max_size_bytes: Option<usize>,
}

impl SizeLimits {
    pub fn is_unbounded(&self) -> bool {
        self.max_items.is_none() && self.max_size_bytes.is_none()
    }

    /// True when `current` (plus an optional incoming item) violates a bound
    pub fn exceeded_by(&self, current: &CacheSize, incoming_bytes: Option<usize>) -> bool {
        let extra_items = usize::from(incoming_bytes.is_some());
        if let Some(max) = self.max_items {
            if current.item_count + extra_items > max {
                return true;
            }
        }
        if let Some(max) = self.max_size_bytes {
            if current.size_bytes + incoming_bytes.unwrap_or(0) > max {
                return true;
            }
        }
        false
    }
}
