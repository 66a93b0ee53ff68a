//! Shared fixtures for strategy tests

use locache_core::{Item, ItemKey, ItemMetadata, SizeLimits};
use locache_storage::{CacheMap, EnhancedMemoryCacheMap, MetadataProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Probe {
    key: ItemKey,
}

impl Item for Probe {
    fn key(&self) -> ItemKey {
        self.key.clone()
    }
}

/// A provider with no backing items; tests insert metadata directly.
pub(crate) fn provider() -> Arc<dyn MetadataProvider> {
    let map: EnhancedMemoryCacheMap<Probe> = EnhancedMemoryCacheMap::new(SizeLimits::default());
    map.metadata_provider()
}

/// Synthetic metadata with controlled ordering fields
pub(crate) fn meta(
    pk: i64,
    added_at: u64,
    last_accessed_at: u64,
    access_count: u64,
    estimated_size: usize,
) -> ItemMetadata {
    let mut m = ItemMetadata::new(ItemKey::primary("probe", pk), estimated_size);
    m.added_at = added_at;
    m.last_accessed_at = last_accessed_at;
    m.access_count = access_count;
    m
}

/// Seed the provider with one record under the given hash
pub(crate) async fn seed(
    provider: &Arc<dyn MetadataProvider>,
    hash: &str,
    metadata: ItemMetadata,
) {
    provider.set_metadata(hash, metadata).await.unwrap();
}
