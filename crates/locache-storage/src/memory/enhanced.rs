//! Enhanced in-memory cache map with size accounting and limits

use async_trait::async_trait;
use locache_core::{
    CacheSize, Item, ItemKey, ItemMetadata, ItemQuery, LocKey, Result, SizeLimits, key_hash,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::backend::{MemoryCacheMap, MemoryMetadata};
use crate::cache_map::{CacheInfo, CacheMap, MetadataProvider};

/// Metadata view that keeps a live byte total alongside the record table.
///
/// Every path that creates, replaces or drops a record adjusts the counter,
/// so `current_size` is O(1) instead of a table scan.
struct EnhancedMetadata {
    table: Arc<MemoryMetadata>,
    bytes: Arc<AtomicUsize>,
    limits: SizeLimits,
}

impl EnhancedMetadata {
    fn credit(&self, old: Option<usize>, new: Option<usize>) {
        let old = old.unwrap_or(0);
        let new = new.unwrap_or(0);
        if new >= old {
            self.bytes.fetch_add(new - old, Ordering::Relaxed);
        } else {
            self.bytes.fetch_sub(old - new, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl MetadataProvider for EnhancedMetadata {
    async fn get_metadata(&self, hash: &str) -> Result<Option<ItemMetadata>> {
        Ok(self.table.get_sync(hash))
    }

    async fn set_metadata(&self, hash: &str, metadata: ItemMetadata) -> Result<()> {
        let old = self.table.get_sync(hash).map(|m| m.estimated_size);
        self.credit(old, Some(metadata.estimated_size));
        self.table.set_metadata(hash, metadata).await
    }

    async fn delete_metadata(&self, hash: &str) -> Result<()> {
        if let Some(old) = self.table.get_sync(hash) {
            self.credit(Some(old.estimated_size), None);
        }
        self.table.delete_metadata(hash).await
    }

    async fn all_metadata(&self) -> Result<HashMap<String, ItemMetadata>> {
        self.table.all_metadata().await
    }

    async fn clear_metadata(&self) -> Result<()> {
        self.bytes.store(0, Ordering::Relaxed);
        self.table.clear_metadata().await
    }

    async fn current_size(&self) -> Result<CacheSize> {
        Ok(CacheSize {
            item_count: self.table.len_sync(),
            size_bytes: self.bytes.load(Ordering::Relaxed),
        })
    }

    fn size_limits(&self) -> SizeLimits {
        self.limits
    }
}

/// In-memory cache map with byte accounting and configurable limits.
///
/// Storage behaves like [`MemoryCacheMap`]; the additional bookkeeping
/// feeds byte- and item-bounded eviction.
pub struct EnhancedMemoryCacheMap<V: Item> {
    inner: MemoryCacheMap<V>,
    metadata: Arc<EnhancedMetadata>,
}

impl<V: Item> EnhancedMemoryCacheMap<V> {
    pub fn new(limits: SizeLimits) -> Self {
        let inner = MemoryCacheMap::with_limits(limits);
        let metadata = Arc::new(EnhancedMetadata {
            table: inner.metadata_table().clone(),
            bytes: Arc::new(AtomicUsize::new(0)),
            limits,
        });
        Self { inner, metadata }
    }

    fn stored_size(&self, hash: &str) -> Option<usize> {
        self.metadata.table.get_sync(hash).map(|m| m.estimated_size)
    }
}

#[async_trait]
impl<V: Item> CacheMap<V> for EnhancedMemoryCacheMap<V> {
    async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &ItemKey, value: V) -> Result<()> {
        let hash = key_hash(key);
        let old = self.stored_size(&hash);
        self.inner.set(key, value).await?;
        let new = self.stored_size(&hash);
        self.metadata.credit(old, new);
        Ok(())
    }

    async fn delete(&self, key: &ItemKey) -> Result<()> {
        let hash = key_hash(key);
        if let Some(old) = self.stored_size(&hash) {
            self.metadata.credit(Some(old), None);
        }
        self.inner.delete(key).await
    }

    async fn includes_key(&self, key: &ItemKey) -> Result<bool> {
        self.inner.includes_key(key).await
    }

    async fn keys(&self) -> Result<Vec<ItemKey>> {
        self.inner.keys().await
    }

    async fn values(&self) -> Result<Vec<V>> {
        self.inner.values().await
    }

    async fn clear(&self) -> Result<()> {
        self.metadata.bytes.store(0, Ordering::Relaxed);
        self.inner.clear().await
    }

    async fn all_in(&self, locations: &[LocKey]) -> Result<Vec<V>> {
        self.inner.all_in(locations).await
    }

    async fn query_in(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>> {
        self.inner.query_in(query, locations).await
    }

    fn clone_map(&self) -> Box<dyn CacheMap<V>> {
        let inner = self.inner.clone_inner();
        let metadata = Arc::new(EnhancedMetadata {
            table: inner.metadata_table().clone(),
            bytes: Arc::new(AtomicUsize::new(self.metadata.bytes.load(Ordering::Relaxed))),
            limits: self.metadata.limits,
        });
        Box::new(EnhancedMemoryCacheMap { inner, metadata })
    }

    async fn invalidate_item_keys(&self, keys: &[ItemKey]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    async fn invalidate_location(&self, locations: &[LocKey]) -> Result<()> {
        let doomed: Vec<ItemKey> = self
            .inner
            .keys()
            .await?
            .into_iter()
            .filter(|k| locations.is_empty() || locache_core::loc_equals(k.loc(), locations))
            .collect();
        for key in &doomed {
            self.delete(key).await?;
        }
        self.inner.clear_query_results().await
    }

    async fn set_query_result(
        &self,
        hash: &str,
        keys: &[ItemKey],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.inner.set_query_result(hash, keys, ttl).await
    }

    async fn get_query_result(&self, hash: &str) -> Result<Option<Vec<ItemKey>>> {
        self.inner.get_query_result(hash).await
    }

    async fn has_query_result(&self, hash: &str) -> Result<bool> {
        self.inner.has_query_result(hash).await
    }

    async fn delete_query_result(&self, hash: &str) -> Result<()> {
        self.inner.delete_query_result(hash).await
    }

    async fn clear_query_results(&self) -> Result<()> {
        self.inner.clear_query_results().await
    }

    fn metadata_provider(&self) -> Arc<dyn MetadataProvider> {
        self.metadata.clone()
    }

    fn implementation_type(&self) -> &'static str {
        "memory/enhanced"
    }

    fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            implementation_type: self.implementation_type(),
            supports_ttl: true,
            supports_eviction: true,
            default_ttl: None,
            eviction_policy: None,
        }
    }
}
