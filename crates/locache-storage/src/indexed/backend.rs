//! Cache map over an asynchronous indexed document store
//!
//! Records are `{originalKey, value, metadata?, version}` keyed by the
//! normalized hash; query results live under a `query:` key prefix.
//! The store is opened lazily and the handle is held for the lifetime of
//! the map; schema versioning of the records drives future migrations.

use async_trait::async_trait;
use locache_core::{
    CacheError, CacheSize, IndexedConfig, Item, ItemKey, ItemMetadata, ItemQuery, LocKey,
    QueryResultEntry, Result, SizeLimits, estimated_size, key_hash, loc_equals, now_millis,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::store::{DocumentStore, FileDocumentStore, MemoryDocumentStore};
use crate::cache_map::{CacheInfo, CacheMap, MetadataProvider};

const QUERY_PREFIX: &str = "query:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedRecord {
    original_key: ItemKey,
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<ItemMetadata>,
    version: u32,
}

/// Metadata capability reading and writing the `metadata` field of records
struct IndexedMetadata {
    store: Arc<dyn DocumentStore>,
    limits: SizeLimits,
}

impl IndexedMetadata {
    async fn read_record(&self, hash: &str) -> Result<Option<IndexedRecord>> {
        match self.store.get(hash).await? {
            None => Ok(None),
            Some(doc) => serde_json::from_value(doc).map(Some).map_err(CacheError::serde),
        }
    }

    async fn write_record(&self, hash: &str, record: &IndexedRecord) -> Result<()> {
        let doc = serde_json::to_value(record).map_err(CacheError::serde)?;
        self.store.put(hash, doc).await
    }

    async fn item_hashes(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()
            .await?
            .into_iter()
            .filter(|k| !k.starts_with(QUERY_PREFIX))
            .collect())
    }
}

#[async_trait]
impl MetadataProvider for IndexedMetadata {
    async fn get_metadata(&self, hash: &str) -> Result<Option<ItemMetadata>> {
        self.store.open().await?;
        Ok(self.read_record(hash).await?.and_then(|r| r.metadata))
    }

    async fn set_metadata(&self, hash: &str, metadata: ItemMetadata) -> Result<()> {
        self.store.open().await?;
        if let Some(mut record) = self.read_record(hash).await? {
            record.metadata = Some(metadata);
            self.write_record(hash, &record).await?;
        }
        Ok(())
    }

    async fn delete_metadata(&self, hash: &str) -> Result<()> {
        self.store.open().await?;
        if let Some(mut record) = self.read_record(hash).await? {
            record.metadata = None;
            self.write_record(hash, &record).await?;
        }
        Ok(())
    }

    async fn all_metadata(&self) -> Result<HashMap<String, ItemMetadata>> {
        self.store.open().await?;
        let mut out = HashMap::new();
        for hash in self.item_hashes().await? {
            if let Some(record) = self.read_record(&hash).await? {
                if let Some(meta) = record.metadata {
                    out.insert(hash, meta);
                }
            }
        }
        Ok(out)
    }

    async fn clear_metadata(&self) -> Result<()> {
        self.store.open().await?;
        for hash in self.item_hashes().await? {
            if let Some(mut record) = self.read_record(&hash).await? {
                if record.metadata.take().is_some() {
                    self.write_record(&hash, &record).await?;
                }
            }
        }
        Ok(())
    }

    async fn current_size(&self) -> Result<CacheSize> {
        self.store.open().await?;
        let mut item_count = 0;
        let mut size_bytes = 0;
        for hash in self.item_hashes().await? {
            if let Some(record) = self.read_record(&hash).await? {
                item_count += 1;
                size_bytes += record.metadata.map(|m| m.estimated_size).unwrap_or(0);
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

/// Asynchronous cache map over an indexed document store
pub struct IndexedCacheMap<V: Item> {
    store: Arc<dyn DocumentStore>,
    version: u32,
    metadata: Arc<IndexedMetadata>,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Item> IndexedCacheMap<V> {
    /// Build from configuration: file-backed under `config.path`, in-memory
    /// otherwise.
    pub fn from_config(config: &IndexedConfig) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match &config.path {
            Some(root) => Arc::new(FileDocumentStore::new(
                root,
                &config.db_name,
                config.version,
                &config.store_name,
            )),
            None => Arc::new(MemoryDocumentStore::new()),
        };
        Self::with_store(store, config)
    }

    pub fn with_store(store: Arc<dyn DocumentStore>, config: &IndexedConfig) -> Result<Self> {
        let limits = config.size.resolve()?;
        let metadata = Arc::new(IndexedMetadata {
            store: store.clone(),
            limits,
        });
        Ok(Self {
            store,
            version: config.version,
            metadata,
            _marker: PhantomData,
        })
    }

    async fn read_record(&self, hash: &str) -> Result<Option<IndexedRecord>> {
        self.store.open().await?;
        self.metadata.read_record(hash).await
    }
}

#[async_trait]
impl<V: Item> CacheMap<V> for IndexedCacheMap<V> {
    async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        match self.read_record(&key_hash(key)).await? {
            None => Ok(None),
            Some(record) => {
                // stored original key must match the requested one
                if record.original_key != *key {
                    return Ok(None);
                }
                serde_json::from_value(record.value)
                    .map(Some)
                    .map_err(CacheError::serde)
            }
        }
    }

    async fn set(&self, key: &ItemKey, value: V) -> Result<()> {
        self.store.open().await?;
        let hash = key_hash(key);
        let size = estimated_size(&value);

        let metadata = match self.read_record(&hash).await?.and_then(|r| r.metadata) {
            Some(mut existing) => {
                existing.replaced(size);
                existing
            }
            None => ItemMetadata::new(key.clone(), size),
        };

        let record = IndexedRecord {
            original_key: key.clone(),
            value: serde_json::to_value(&value).map_err(CacheError::serde)?,
            metadata: Some(metadata),
            version: self.version,
        };
        self.metadata.write_record(&hash, &record).await
    }

    async fn delete(&self, key: &ItemKey) -> Result<()> {
        self.store.open().await?;
        self.store.delete(&key_hash(key)).await
    }

    async fn includes_key(&self, key: &ItemKey) -> Result<bool> {
        Ok(self
            .read_record(&key_hash(key))
            .await?
            .map(|r| r.original_key == *key)
            .unwrap_or(false))
    }

    async fn keys(&self) -> Result<Vec<ItemKey>> {
        self.store.open().await?;
        let mut keys = Vec::new();
        for hash in self.metadata.item_hashes().await? {
            if let Some(record) = self.metadata.read_record(&hash).await? {
                keys.push(record.original_key);
            }
        }
        Ok(keys)
    }

    async fn values(&self) -> Result<Vec<V>> {
        self.all_in(&[]).await
    }

    async fn clear(&self) -> Result<()> {
        self.store.open().await?;
        self.store.clear().await
    }

    async fn all_in(&self, locations: &[LocKey]) -> Result<Vec<V>> {
        self.store.open().await?;
        let mut values = Vec::new();
        for hash in self.metadata.item_hashes().await? {
            if let Some(record) = self.metadata.read_record(&hash).await? {
                if locations.is_empty() || loc_equals(record.original_key.loc(), locations) {
                    values.push(
                        serde_json::from_value(record.value).map_err(CacheError::serde)?,
                    );
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
        // a view over the same backing store
        Box::new(Self {
            store: self.store.clone(),
            version: self.version,
            metadata: self.metadata.clone(),
            _marker: PhantomData,
        })
    }

    async fn invalidate_item_keys(&self, keys: &[ItemKey]) -> Result<()> {
        self.store.open().await?;
        for key in keys {
            self.store.delete(&key_hash(key)).await?;
        }
        Ok(())
    }

    async fn invalidate_location(&self, locations: &[LocKey]) -> Result<()> {
        self.store.open().await?;
        for hash in self.metadata.item_hashes().await? {
            if let Some(record) = self.metadata.read_record(&hash).await? {
                if locations.is_empty() || loc_equals(record.original_key.loc(), locations) {
                    self.store.delete(&hash).await?;
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
        self.store.open().await?;
        let expires_at = ttl.map(|t| now_millis() + t.as_millis() as u64);
        let entry = QueryResultEntry::new(keys.to_vec(), expires_at);
        let doc = serde_json::to_value(&entry).map_err(CacheError::serde)?;
        self.store.put(&format!("{QUERY_PREFIX}{hash}"), doc).await
    }

    async fn get_query_result(&self, hash: &str) -> Result<Option<Vec<ItemKey>>> {
        self.store.open().await?;
        let store_key = format!("{QUERY_PREFIX}{hash}");
        match self.store.get(&store_key).await? {
            None => Ok(None),
            Some(doc) => {
                let entry: QueryResultEntry =
                    serde_json::from_value(doc).map_err(CacheError::serde)?;
                if entry.is_expired(now_millis()) {
                    self.store.delete(&store_key).await?;
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
        self.store.open().await?;
        self.store.delete(&format!("{QUERY_PREFIX}{hash}")).await
    }

    async fn clear_query_results(&self) -> Result<()> {
        self.store.open().await?;
        for key in self.store.keys().await? {
            if key.starts_with(QUERY_PREFIX) {
                self.store.delete(&key).await?;
            }
        }
        Ok(())
    }

    fn metadata_provider(&self) -> Arc<dyn MetadataProvider> {
        self.metadata.clone()
    }

    fn implementation_type(&self) -> &'static str {
        "indexed/async"
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        key: ItemKey,
        label: String,
    }

    impl Item for Record {
        fn key(&self) -> ItemKey {
            self.key.clone()
        }
    }

    fn record(pk: i64, label: &str) -> Record {
        Record {
            key: ItemKey::primary("record", pk),
            label: label.to_string(),
        }
    }

    fn memory_map() -> IndexedCacheMap<Record> {
        IndexedCacheMap::from_config(&IndexedConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let map = memory_map();
        let r = record(1, "a");
        map.set(&r.key(), r.clone()).await.unwrap();
        assert_eq!(map.get(&r.key()).await.unwrap(), Some(r.clone()));
        assert_eq!(map.get(&ItemKey::primary("record", "1")).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn test_record_carries_schema_version_and_metadata() {
        let store = Arc::new(MemoryDocumentStore::new());
        let config = IndexedConfig {
            version: 3,
            ..Default::default()
        };
        let map: IndexedCacheMap<Record> =
            IndexedCacheMap::with_store(store.clone(), &config).unwrap();

        let r = record(1, "a");
        map.set(&r.key(), r.clone()).await.unwrap();

        let doc = store.get(&key_hash(&r.key())).await.unwrap().unwrap();
        assert_eq!(doc["version"], 3);
        assert!(doc.get("originalKey").is_some());
        assert!(doc.get("metadata").is_some());
    }

    #[tokio::test]
    async fn test_metadata_provider_roundtrip() {
        let map = memory_map();
        let r = record(1, "a");
        map.set(&r.key(), r.clone()).await.unwrap();

        let provider = map.metadata_provider();
        let hash = key_hash(&r.key());
        let mut meta = provider.get_metadata(&hash).await.unwrap().unwrap();
        assert_eq!(meta.access_count, 0);

        meta.touch();
        provider.set_metadata(&hash, meta).await.unwrap();
        let meta = provider.get_metadata(&hash).await.unwrap().unwrap();
        assert_eq!(meta.access_count, 1);

        let size = provider.current_size().await.unwrap();
        assert_eq!(size.item_count, 1);
        assert!(size.size_bytes > 0);
    }

    #[tokio::test]
    async fn test_query_results_live_under_query_prefix() {
        let store = Arc::new(MemoryDocumentStore::new());
        let map: IndexedCacheMap<Record> =
            IndexedCacheMap::with_store(store.clone(), &IndexedConfig::default()).unwrap();

        map.set_query_result("qh", &[ItemKey::primary("record", 1)], None)
            .await
            .unwrap();
        assert!(store.get("query:qh").await.unwrap().is_some());

        let keys = map.get_query_result("qh").await.unwrap().unwrap();
        assert_eq!(keys, vec![ItemKey::primary("record", 1)]);

        // query results are not items
        assert_eq!(
            map.metadata_provider()
                .current_size()
                .await
                .unwrap()
                .item_count,
            0
        );
    }

    #[tokio::test]
    async fn test_query_result_expiry() {
        let map = memory_map();
        map.set_query_result("qh", &[], Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(map.get_query_result("qh").await.unwrap().is_none());
        assert!(!map.has_query_result("qh").await.unwrap());
    }

    #[tokio::test]
    async fn test_clone_map_shares_backing_store() {
        let map = memory_map();
        let r = record(1, "a");
        map.set(&r.key(), r.clone()).await.unwrap();

        let view = map.clone_map();
        assert_eq!(view.get(&r.key()).await.unwrap(), Some(r.clone()));
        view.delete(&r.key()).await.unwrap();
        assert!(map.get(&r.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexedConfig {
            path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        {
            let map: IndexedCacheMap<Record> = IndexedCacheMap::from_config(&config).unwrap();
            map.set(&record(1, "a").key(), record(1, "a")).await.unwrap();
        }

        let map: IndexedCacheMap<Record> = IndexedCacheMap::from_config(&config).unwrap();
        assert_eq!(
            map.get(&record(1, "a").key()).await.unwrap(),
            Some(record(1, "a"))
        );
    }

    #[tokio::test]
    async fn test_invalidate_location() {
        let map = memory_map();
        let scoped = Record {
            key: ItemKey::composite("record", 1, vec![LocKey::new("org", 5)]),
            label: "scoped".to_string(),
        };
        let top = record(2, "top");
        map.set(&scoped.key(), scoped.clone()).await.unwrap();
        map.set(&top.key(), top.clone()).await.unwrap();
        map.set_query_result("qh", &[top.key()], None).await.unwrap();

        map.invalidate_location(&[LocKey::new("org", 5)]).await.unwrap();

        assert!(map.get(&scoped.key()).await.unwrap().is_none());
        assert!(map.get(&top.key()).await.unwrap().is_some());
        assert!(map.get_query_result("qh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_empty_location_matches_every_item() {
        let map = memory_map();
        let scoped = Record {
            key: ItemKey::composite("record", 1, vec![LocKey::new("org", 5)]),
            label: "scoped".to_string(),
        };
        let top = record(2, "top");
        map.set(&scoped.key(), scoped.clone()).await.unwrap();
        map.set(&top.key(), top.clone()).await.unwrap();

        map.invalidate_location(&[]).await.unwrap();

        assert!(map.get(&scoped.key()).await.unwrap().is_none());
        assert!(map.get(&top.key()).await.unwrap().is_none());
        assert!(map.keys().await.unwrap().is_empty());
    }
}
