//! Serialized cache map over a string-KV store
//!
//! Entries, query results and metadata live under distinct sub-prefixes of
//! one namespace. A verification hash guards against normalization
//! collisions; quota exhaustion triggers a cleanup of the oldest quarter of
//! regular entries before the write is retried once.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use locache_core::{
    CacheError, CacheSize, Item, ItemKey, ItemMetadata, ItemQuery, KvConfig, LocKey,
    QueryResultEntry, Result, SizeLimits, estimated_size, key_hash, loc_equals, normalize,
    now_millis, verification_hash,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::store::{FileKvStore, KvStore, MemoryKvStore};
use crate::cache_map::{CacheInfo, CacheMap, MetadataProvider};

/// Which storage area the map models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvFlavor {
    /// Ephemeral, process-lifetime store
    Session,
    /// Persistent file-backed store
    Local,
}

/// Wire format of one stored item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KvEntry {
    original_key: ItemKey,
    value: Value,
    timestamp: u64,
    original_verification_hash: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    compressed: bool,
}

enum StoreKeyKind {
    Entry(String),
    Query,
    Metadata(String),
}

/// Metadata capability over the `:metadata:` sub-prefix
struct KvMetadata {
    store: Arc<dyn KvStore>,
    prefix: String,
    limits: SizeLimits,
}

impl KvMetadata {
    fn meta_store_key(&self, hash: &str) -> String {
        format!("{}:metadata:{}", self.prefix, hash)
    }

    fn classify(&self, store_key: &str) -> Option<StoreKeyKind> {
        let rest = store_key.strip_prefix(&format!("{}:", self.prefix))?;
        if rest.starts_with("query:") {
            Some(StoreKeyKind::Query)
        } else if let Some(hash) = rest.strip_prefix("metadata:") {
            Some(StoreKeyKind::Metadata(hash.to_string()))
        } else {
            Some(StoreKeyKind::Entry(rest.to_string()))
        }
    }
}

#[async_trait]
impl MetadataProvider for KvMetadata {
    async fn get_metadata(&self, hash: &str) -> Result<Option<ItemMetadata>> {
        match self.store.get_item(&self.meta_store_key(hash))? {
            None => Ok(None),
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
        }
    }

    async fn set_metadata(&self, hash: &str, metadata: ItemMetadata) -> Result<()> {
        let raw = serde_json::to_string(&metadata).map_err(CacheError::serde)?;
        self.store.set_item(&self.meta_store_key(hash), &raw)
    }

    async fn delete_metadata(&self, hash: &str) -> Result<()> {
        self.store.remove_item(&self.meta_store_key(hash))
    }

    async fn all_metadata(&self) -> Result<HashMap<String, ItemMetadata>> {
        let mut out = HashMap::new();
        for store_key in self.store.keys()? {
            if let Some(StoreKeyKind::Metadata(hash)) = self.classify(&store_key) {
                if let Some(raw) = self.store.get_item(&store_key)? {
                    if let Ok(meta) = serde_json::from_str::<ItemMetadata>(&raw) {
                        out.insert(hash, meta);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn clear_metadata(&self) -> Result<()> {
        for store_key in self.store.keys()? {
            if matches!(self.classify(&store_key), Some(StoreKeyKind::Metadata(_))) {
                self.store.remove_item(&store_key)?;
            }
        }
        Ok(())
    }

    async fn current_size(&self) -> Result<CacheSize> {
        let mut item_count = 0;
        let mut size_bytes = 0;
        for store_key in self.store.keys()? {
            match self.classify(&store_key) {
                Some(StoreKeyKind::Entry(_)) => item_count += 1,
                Some(StoreKeyKind::Metadata(_)) => {
                    if let Some(raw) = self.store.get_item(&store_key)? {
                        if let Ok(meta) = serde_json::from_str::<ItemMetadata>(&raw) {
                            size_bytes += meta.estimated_size;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(CacheSize {
            item_count,
            size_bytes,
        })
    }

    fn size_limits(&self) -> SizeLimits {
        self.limits
    }
}

/// Cache map serializing items into a string-KV store
pub struct KvCacheMap<V: Item> {
    store: Arc<dyn KvStore>,
    prefix: String,
    flavor: KvFlavor,
    compress: bool,
    metadata: Arc<KvMetadata>,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Item> KvCacheMap<V> {
    /// Ephemeral flavor over an in-process store
    pub fn session(config: &KvConfig, namespace: &str) -> Result<Self> {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new(config.quota_bytes));
        Self::with_store(store, config, namespace, KvFlavor::Session)
    }

    /// Persistent flavor over a file-backed store; `config.path` is required
    pub fn local(config: &KvConfig, namespace: &str) -> Result<Self> {
        let path = config.path.as_ref().ok_or_else(|| {
            CacheError::ConfigInvalid("local cache type requires kv.path".to_string())
        })?;
        let store: Arc<dyn KvStore> = Arc::new(FileKvStore::open(path, config.quota_bytes)?);
        Self::with_store(store, config, namespace, KvFlavor::Local)
    }

    /// Any store implementing the KV contract
    pub fn with_store(
        store: Arc<dyn KvStore>,
        config: &KvConfig,
        namespace: &str,
        flavor: KvFlavor,
    ) -> Result<Self> {
        let limits = config.size.resolve()?;
        let prefix = if namespace.is_empty() {
            config.key_prefix.clone()
        } else {
            format!("{}:{}", config.key_prefix, namespace)
        };
        let metadata = Arc::new(KvMetadata {
            store: store.clone(),
            prefix: prefix.clone(),
            limits,
        });
        Ok(Self {
            store,
            prefix,
            flavor,
            compress: config.compress,
            metadata,
            _marker: PhantomData,
        })
    }

    fn entry_store_key(&self, hash: &str) -> String {
        format!("{}:{}", self.prefix, hash)
    }

    fn query_store_key(&self, query_hash: &str) -> String {
        format!("{}:query:{}", self.prefix, query_hash)
    }

    fn encode_value(&self, value: &V) -> Result<(Value, bool)> {
        if self.compress {
            let bytes = serde_json::to_vec(value).map_err(CacheError::serde)?;
            let packed =
                zstd::encode_all(&bytes[..], 0).map_err(|e| CacheError::Storage(e.to_string()))?;
            Ok((Value::String(BASE64.encode(packed)), true))
        } else {
            Ok((serde_json::to_value(value).map_err(CacheError::serde)?, false))
        }
    }

    fn decode_value(entry: &KvEntry) -> Result<V> {
        if entry.compressed {
            let encoded = entry.value.as_str().ok_or_else(|| {
                CacheError::Serialization("compressed value is not a string".to_string())
            })?;
            let packed = BASE64
                .decode(encoded)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            let bytes =
                zstd::decode_all(&packed[..]).map_err(|e| CacheError::Storage(e.to_string()))?;
            serde_json::from_slice(&bytes).map_err(CacheError::serde)
        } else {
            serde_json::from_value(entry.value.clone()).map_err(CacheError::serde)
        }
    }

    fn read_entry(&self, hash: &str) -> Result<Option<KvEntry>> {
        match self.store.get_item(&self.entry_store_key(hash))? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(CacheError::serde),
        }
    }

    /// Write with one quota-cleanup retry
    fn set_with_cleanup(&self, store_key: &str, raw: &str) -> Result<()> {
        match self.store.set_item(store_key, raw) {
            Err(CacheError::StorageFull) => {
                self.cleanup_oldest_quarter()?;
                self.store.set_item(store_key, raw)
            }
            other => other,
        }
    }

    /// Delete the oldest 25% of regular entries (and their metadata)
    fn cleanup_oldest_quarter(&self) -> Result<()> {
        let mut aged: Vec<(String, String, u64)> = Vec::new();
        for store_key in self.store.keys()? {
            if let Some(StoreKeyKind::Entry(hash)) = self.metadata.classify(&store_key) {
                if let Some(raw) = self.store.get_item(&store_key)? {
                    if let Ok(entry) = serde_json::from_str::<KvEntry>(&raw) {
                        aged.push((store_key, hash, entry.timestamp));
                    }
                }
            }
        }
        if aged.is_empty() {
            return Ok(());
        }
        aged.sort_by_key(|(_, _, ts)| *ts);
        let count = (aged.len().div_ceil(4)).max(1);
        for (store_key, hash, _) in aged.into_iter().take(count) {
            self.store.remove_item(&store_key)?;
            self.store
                .remove_item(&self.metadata.meta_store_key(&hash))?;
        }
        warn!(removed = count, prefix = %self.prefix, "kv store quota cleanup");
        Ok(())
    }

    fn entry_hashes(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        for store_key in self.store.keys()? {
            if let Some(StoreKeyKind::Entry(hash)) = self.metadata.classify(&store_key) {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }

    fn delete_by_hash(&self, hash: &str) -> Result<()> {
        self.store.remove_item(&self.entry_store_key(hash))?;
        self.store
            .remove_item(&self.metadata.meta_store_key(hash))?;
        Ok(())
    }
}

#[async_trait]
impl<V: Item> CacheMap<V> for KvCacheMap<V> {
    async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        let hash = key_hash(key);
        match self.read_entry(&hash)? {
            None => Ok(None),
            Some(entry) => {
                // a verification mismatch means a storage-hash collision
                if entry.original_verification_hash != verification_hash(&normalize(key)) {
                    return Ok(None);
                }
                Ok(Some(Self::decode_value(&entry)?))
            }
        }
    }

    async fn set(&self, key: &ItemKey, value: V) -> Result<()> {
        let hash = key_hash(key);
        let size = estimated_size(&value);
        let (encoded, compressed) = self.encode_value(&value)?;
        let entry = KvEntry {
            original_key: key.clone(),
            value: encoded,
            timestamp: now_millis(),
            original_verification_hash: verification_hash(&normalize(key)),
            compressed,
        };
        let raw = serde_json::to_string(&entry).map_err(CacheError::serde)?;
        self.set_with_cleanup(&self.entry_store_key(&hash), &raw)?;

        let meta = match self.metadata.get_metadata(&hash).await? {
            Some(mut existing) => {
                existing.replaced(size);
                existing
            }
            None => ItemMetadata::new(key.clone(), size),
        };
        let meta_raw = serde_json::to_string(&meta).map_err(CacheError::serde)?;
        self.set_with_cleanup(&self.metadata.meta_store_key(&hash), &meta_raw)
    }

    async fn delete(&self, key: &ItemKey) -> Result<()> {
        self.delete_by_hash(&key_hash(key))
    }

    async fn includes_key(&self, key: &ItemKey) -> Result<bool> {
        let hash = key_hash(key);
        Ok(self
            .read_entry(&hash)?
            .map(|e| e.original_verification_hash == verification_hash(&normalize(key)))
            .unwrap_or(false))
    }

    async fn keys(&self) -> Result<Vec<ItemKey>> {
        let mut keys = Vec::new();
        for hash in self.entry_hashes()? {
            if let Some(entry) = self.read_entry(&hash)? {
                keys.push(entry.original_key);
            }
        }
        Ok(keys)
    }

    async fn values(&self) -> Result<Vec<V>> {
        let mut values = Vec::new();
        for hash in self.entry_hashes()? {
            if let Some(entry) = self.read_entry(&hash)? {
                values.push(Self::decode_value(&entry)?);
            }
        }
        Ok(values)
    }

    async fn clear(&self) -> Result<()> {
        for store_key in self.store.keys()? {
            if self.metadata.classify(&store_key).is_some() {
                self.store.remove_item(&store_key)?;
            }
        }
        Ok(())
    }

    async fn all_in(&self, locations: &[LocKey]) -> Result<Vec<V>> {
        let mut values = Vec::new();
        for hash in self.entry_hashes()? {
            if let Some(entry) = self.read_entry(&hash)? {
                if locations.is_empty() || loc_equals(entry.original_key.loc(), locations) {
                    values.push(Self::decode_value(&entry)?);
                }
            }
        }
        Ok(values)
    }

    async fn query_in(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>> {
        let mut matched = Vec::new();
        for value in self.all_in(locations).await? {
            let as_value = serde_json::to_value(&value).map_err(CacheError::serde)?;
            if query.matches(&as_value) {
                matched.push(value);
            }
        }
        Ok(query.window(matched))
    }

    fn clone_map(&self) -> Box<dyn CacheMap<V>> {
        // a view over the same backing storage
        Box::new(Self {
            store: self.store.clone(),
            prefix: self.prefix.clone(),
            flavor: self.flavor,
            compress: self.compress,
            metadata: self.metadata.clone(),
            _marker: PhantomData,
        })
    }

    async fn invalidate_item_keys(&self, keys: &[ItemKey]) -> Result<()> {
        for key in keys {
            self.delete_by_hash(&key_hash(key))?;
        }
        Ok(())
    }

    async fn invalidate_location(&self, locations: &[LocKey]) -> Result<()> {
        for hash in self.entry_hashes()? {
            if let Some(entry) = self.read_entry(&hash)? {
                if locations.is_empty() || loc_equals(entry.original_key.loc(), locations) {
                    self.delete_by_hash(&hash)?;
                }
            }
        }
        self.clear_query_results().await
    }

    async fn set_query_result(
        &self,
        hash: &str,
        keys: &[ItemKey],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl.map(|t| now_millis() + t.as_millis() as u64);
        let entry = QueryResultEntry::new(keys.to_vec(), expires_at);
        let raw = serde_json::to_string(&entry).map_err(CacheError::serde)?;
        self.set_with_cleanup(&self.query_store_key(hash), &raw)
    }

    async fn get_query_result(&self, hash: &str) -> Result<Option<Vec<ItemKey>>> {
        let store_key = self.query_store_key(hash);
        match self.store.get_item(&store_key)? {
            None => Ok(None),
            Some(raw) => {
                // tolerates both the object form and the legacy bare array
                let entry: QueryResultEntry =
                    serde_json::from_str(&raw).map_err(CacheError::serde)?;
                if entry.is_expired(now_millis()) {
                    self.store.remove_item(&store_key)?;
                    Ok(None)
                } else {
                    Ok(Some(entry.item_keys))
                }
            }
        }
    }

    async fn has_query_result(&self, hash: &str) -> Result<bool> {
        Ok(self.get_query_result(hash).await?.is_some())
    }

    async fn delete_query_result(&self, hash: &str) -> Result<()> {
        self.store.remove_item(&self.query_store_key(hash))
    }

    async fn clear_query_results(&self) -> Result<()> {
        for store_key in self.store.keys()? {
            if matches!(self.metadata.classify(&store_key), Some(StoreKeyKind::Query)) {
                self.store.remove_item(&store_key)?;
            }
        }
        Ok(())
    }

    fn metadata_provider(&self) -> Arc<dyn MetadataProvider> {
        self.metadata.clone()
    }

    fn implementation_type(&self) -> &'static str {
        match self.flavor {
            KvFlavor::Session => "kv/session",
            KvFlavor::Local => "kv/local",
        }
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
