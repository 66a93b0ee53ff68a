//! The cache map contract and the metadata capability it exposes

use async_trait::async_trait;
use locache_core::{
    CacheSize, Item, ItemKey, ItemMetadata, ItemQuery, LocKey, Result, SizeLimits,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Capabilities reported by a cache map
#[derive(Debug, Clone, PartialEq)]
pub struct CacheInfo {
    pub implementation_type: &'static str,
    pub supports_ttl: bool,
    pub supports_eviction: bool,
    pub default_ttl: Option<Duration>,
    pub eviction_policy: Option<String>,
}

/// Per-item usage bookkeeping exposed by every cache map.
///
/// Keys are normalized-hash strings. Eviction strategies operate only on
/// this view; they never hold references into the stored items.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn get_metadata(&self, hash: &str) -> Result<Option<ItemMetadata>>;

    async fn set_metadata(&self, hash: &str, metadata: ItemMetadata) -> Result<()>;

    async fn delete_metadata(&self, hash: &str) -> Result<()>;

    async fn all_metadata(&self) -> Result<HashMap<String, ItemMetadata>>;

    async fn clear_metadata(&self) -> Result<()>;

    /// Current occupancy: live item count and estimated bytes
    async fn current_size(&self) -> Result<CacheSize>;

    /// Configured bounds; unbounded dimensions are `None`
    fn size_limits(&self) -> SizeLimits;
}

/// Key → item store with a query-result subcache and usage metadata.
///
/// This is the canonical asynchronous contract; synchronous backends
/// return already-resolved values and callers always await.
#[async_trait]
pub trait CacheMap<V: Item>: Send + Sync {
    /// Returns the stored item whose original key normalizes to the same
    /// value as `key`. A storage-hash collision resolves to `None`.
    async fn get(&self, key: &ItemKey) -> Result<Option<V>>;

    /// Store `value` under the normalized form of `key`, creating or
    /// refreshing its metadata record. Fails with `StorageFull` on store
    /// capacity exhaustion after one cleanup attempt.
    async fn set(&self, key: &ItemKey, value: V) -> Result<()>;

    /// Remove the item and its metadata; idempotent.
    async fn delete(&self, key: &ItemKey) -> Result<()>;

    /// True iff `get` would return an item, ignoring TTL.
    async fn includes_key(&self, key: &ItemKey) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<ItemKey>>;

    async fn values(&self) -> Result<Vec<V>>;

    async fn clear(&self) -> Result<()>;

    /// All stored items whose composite-key location equals the given
    /// prefix; an empty prefix matches every stored item.
    async fn all_in(&self, locations: &[LocKey]) -> Result<Vec<V>>;

    /// Whether any stored item in the scope matches the query
    async fn contains(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<bool> {
        Ok(!self.query_in(query, locations).await?.is_empty())
    }

    /// Scan the scope and apply the query predicate
    async fn query_in(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>>;

    /// Structural copy sharing configuration. Persistent backends may
    /// return a view over the same backing storage.
    fn clone_map(&self) -> Box<dyn CacheMap<V>>;

    /// Delete the listed items
    async fn invalidate_item_keys(&self, keys: &[ItemKey]) -> Result<()>;

    /// Delete every item in the location scope and clear all query
    /// results, since location membership may have changed.
    async fn invalidate_location(&self, locations: &[LocKey]) -> Result<()>;

    async fn set_query_result(
        &self,
        hash: &str,
        keys: &[ItemKey],
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Returns `None` for an absent or expired result; an expired entry is
    /// removed on observation.
    async fn get_query_result(&self, hash: &str) -> Result<Option<Vec<ItemKey>>>;

    async fn has_query_result(&self, hash: &str) -> Result<bool>;

    async fn delete_query_result(&self, hash: &str) -> Result<()>;

    async fn clear_query_results(&self) -> Result<()>;

    /// The metadata capability backing this map
    fn metadata_provider(&self) -> Arc<dyn MetadataProvider>;

    /// Implementation tag, e.g. `memory/memory` or `kv/session`
    fn implementation_type(&self) -> &'static str;

    fn cache_info(&self) -> CacheInfo;
}
