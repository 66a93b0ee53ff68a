//! Simple in-memory cache map backed by DashMap

use async_trait::async_trait;
use dashmap::DashMap;
use locache_core::{
    CacheSize, Item, ItemKey, ItemMetadata, ItemQuery, LocKey, QueryResultEntry, Result,
    SizeLimits, estimated_size, key_hash, loc_equals, now_millis,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache_map::{CacheInfo, CacheMap, MetadataProvider};

/// One stored item with the key it was stored under
#[derive(Debug, Clone)]
struct StoredItem<V> {
    key: ItemKey,
    value: V,
}

/// Metadata table for the in-memory maps
pub(crate) struct MemoryMetadata {
    entries: DashMap<String, ItemMetadata>,
    limits: SizeLimits,
}

impl MemoryMetadata {
    pub(crate) fn new(limits: SizeLimits) -> Self {
        Self {
            entries: DashMap::new(),
            limits,
        }
    }

    pub(crate) fn get_sync(&self, hash: &str) -> Option<ItemMetadata> {
        self.entries.get(hash).map(|m| m.clone())
    }

    pub(crate) fn upsert_for_set(&self, hash: &str, key: &ItemKey, size: usize) {
        match self.entries.get_mut(hash) {
            Some(mut meta) => meta.replaced(size),
            None => {
                self.entries
                    .insert(hash.to_string(), ItemMetadata::new(key.clone(), size));
            }
        }
    }

    pub(crate) fn remove_sync(&self, hash: &str) {
        self.entries.remove(hash);
    }

    pub(crate) fn len_sync(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear_sync(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl MetadataProvider for MemoryMetadata {
    async fn get_metadata(&self, hash: &str) -> Result<Option<ItemMetadata>> {
        Ok(self.get_sync(hash))
    }

    async fn set_metadata(&self, hash: &str, metadata: ItemMetadata) -> Result<()> {
        self.entries.insert(hash.to_string(), metadata);
        Ok(())
    }

    async fn delete_metadata(&self, hash: &str) -> Result<()> {
        self.entries.remove(hash);
        Ok(())
    }

    async fn all_metadata(&self) -> Result<HashMap<String, ItemMetadata>> {
        Ok(self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn clear_metadata(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn current_size(&self) -> Result<CacheSize> {
        let size_bytes = self.entries.iter().map(|e| e.value().estimated_size).sum();
        Ok(CacheSize {
            item_count: self.entries.len(),
            size_bytes,
        })
    }

    fn size_limits(&self) -> SizeLimits {
        self.limits
    }
}

/// Plain in-memory cache map.
///
/// Single-process; maps are native. No size limits: bounded variants use
/// [`EnhancedMemoryCacheMap`](super::EnhancedMemoryCacheMap).
pub struct MemoryCacheMap<V: Item> {
    items: Arc<DashMap<String, StoredItem<V>>>,
    query_results: Arc<DashMap<String, QueryResultEntry>>,
    metadata: Arc<MemoryMetadata>,
}

impl<V: Item> MemoryCacheMap<V> {
    pub fn new() -> Self {
        Self::with_limits(SizeLimits::default())
    }

    pub(crate) fn with_limits(limits: SizeLimits) -> Self {
        Self {
            items: Arc::new(DashMap::new()),
            query_results: Arc::new(DashMap::new()),
            metadata: Arc::new(MemoryMetadata::new(limits)),
        }
    }

    pub(crate) fn metadata_table(&self) -> &Arc<MemoryMetadata> {
        &self.metadata
    }

    /// Structural copy: fresh maps carrying the same entries and config
    pub(crate) fn clone_inner(&self) -> MemoryCacheMap<V> {
        let copy = MemoryCacheMap::with_limits(self.metadata.limits);
        for entry in self.items.iter() {
            copy.items.insert(entry.key().clone(), entry.value().clone());
        }
        for entry in self.query_results.iter() {
            copy.query_results
                .insert(entry.key().clone(), entry.value().clone());
        }
        for entry in self.metadata.entries.iter() {
            copy.metadata
                .entries
                .insert(entry.key().clone(), entry.value().clone());
        }
        copy
    }

    fn delete_by_hash(&self, hash: &str) {
        self.items.remove(hash);
        self.metadata.remove_sync(hash);
    }

    fn matching_values(&self, locations: &[LocKey]) -> Vec<StoredItem<V>> {
        self.items
            .iter()
            .filter(|e| locations.is_empty() || loc_equals(e.value().key.loc(), locations))
            .map(|e| e.value().clone())
            .collect()
    }
}

impl<V: Item> Default for MemoryCacheMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Item> CacheMap<V> for MemoryCacheMap<V> {
    async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        let hash = key_hash(key);
        match self.items.get(&hash) {
            // a hash collision between different logical keys is a miss
            Some(stored) if stored.key == *key => Ok(Some(stored.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &ItemKey, value: V) -> Result<()> {
        let hash = key_hash(key);
        let size = estimated_size(&value);
        self.metadata.upsert_for_set(&hash, key, size);
        self.items.insert(
            hash,
            StoredItem {
                key: key.clone(),
                value,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &ItemKey) -> Result<()> {
        self.delete_by_hash(&key_hash(key));
        Ok(())
    }

    async fn includes_key(&self, key: &ItemKey) -> Result<bool> {
        let hash = key_hash(key);
        Ok(self
            .items
            .get(&hash)
            .map(|stored| stored.key == *key)
            .unwrap_or(false))
    }

    async fn keys(&self) -> Result<Vec<ItemKey>> {
        Ok(self.items.iter().map(|e| e.value().key.clone()).collect())
    }

    async fn values(&self) -> Result<Vec<V>> {
        Ok(self.items.iter().map(|e| e.value().value.clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.items.clear();
        self.query_results.clear();
        self.metadata.clear_sync();
        Ok(())
    }

    async fn all_in(&self, locations: &[LocKey]) -> Result<Vec<V>> {
        Ok(self
            .matching_values(locations)
            .into_iter()
            .map(|s| s.value)
            .collect())
    }

    async fn query_in(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>> {
        let mut matched = Vec::new();
        for stored in self.matching_values(locations) {
            let as_value = serde_json::to_value(&stored.value).map_err(locache_core::CacheError::serde)?;
            if query.matches(&as_value) {
                matched.push(stored.value);
            }
        }
        Ok(query.window(matched))
    }

    fn clone_map(&self) -> Box<dyn CacheMap<V>> {
        Box::new(self.clone_inner())
    }

    async fn invalidate_item_keys(&self, keys: &[ItemKey]) -> Result<()> {
        for key in keys {
            self.delete_by_hash(&key_hash(key));
        }
        Ok(())
    }

    async fn invalidate_location(&self, locations: &[LocKey]) -> Result<()> {
        let doomed: Vec<String> = self
            .items
            .iter()
            .filter(|e| locations.is_empty() || loc_equals(e.value().key.loc(), locations))
            .map(|e| e.key().clone())
            .collect();
        for hash in doomed {
            self.delete_by_hash(&hash);
        }
        self.query_results.clear();
        Ok(())
    }

    async fn set_query_result(
        &self,
        hash: &str,
        keys: &[ItemKey],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl.map(|t| now_millis() + t.as_millis() as u64);
        self.query_results.insert(
            hash.to_string(),
            QueryResultEntry::new(keys.to_vec(), expires_at),
        );
        Ok(())
    }

    async fn get_query_result(&self, hash: &str) -> Result<Option<Vec<ItemKey>>> {
        let expired = match self.query_results.get(hash) {
            None => return Ok(None),
            Some(entry) => {
                if entry.is_expired(now_millis()) {
                    true
                } else {
                    return Ok(Some(entry.item_keys.clone()));
                }
            }
        };
        if expired {
            self.query_results.remove(hash);
        }
        Ok(None)
    }

    async fn has_query_result(&self, hash: &str) -> Result<bool> {
        Ok(self.get_query_result(hash).await?.is_some())
    }

    async fn delete_query_result(&self, hash: &str) -> Result<()> {
        self.query_results.remove(hash);
        Ok(())
    }

    async fn clear_query_results(&self) -> Result<()> {
        self.query_results.clear();
        Ok(())
    }

    fn metadata_provider(&self) -> Arc<dyn MetadataProvider> {
        self.metadata.clone()
    }

    fn implementation_type(&self) -> &'static str {
        "memory/memory"
    }

    fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            implementation_type: self.implementation_type(),
            supports_ttl: true,
            supports_eviction: !self.metadata.limits.is_unbounded(),
            default_ttl: None,
            eviction_policy: None,
        }
    }
}
