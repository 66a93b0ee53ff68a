//! Cache operations: the read/write surface over one entity type

use locache_core::{
    ApiOptions, CacheConfig, CacheError, CacheEvent, CacheEventKind, CacheStats, Coordinate,
    EventEmitter, EventSource, Item, ItemApi, ItemKey, ItemQuery, LocKey, MAX_LOCATION_DEPTH,
    Result, StatsManager, SubscriptionId, TtlManager, finder_hash, key_hash, normalize,
    query_hash,
};
use locache_evict::EvictionManager;
use locache_storage::{CacheInfo, CacheMap, CacheMapFactory, create_cache_map};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::coalescer::Coalescer;

/// Where a retrieved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    Cache,
    Api,
}

/// Result of [`Cache::retrieve`]: the value plus whether the read had to
/// refresh from the API.
#[derive(Debug, Clone)]
pub struct Retrieval<V> {
    pub value: Option<V>,
    pub source: RetrievalSource,
}

impl<V> Retrieval<V> {
    /// True when the read went to the API rather than being served purely
    /// from cache.
    pub fn refreshed(&self) -> bool {
        self.source == RetrievalSource::Api
    }
}

/// A hierarchical, location-aware cache over one entity type.
///
/// Reads are served from the cache map when fresh; misses resolve through
/// the API (coalesced per key) and populate the map. Writes flow through
/// the API and refresh or invalidate affected entries. Cloning creates a
/// new handle to the SAME cache context.
pub struct Cache<V: Item, A: ItemApi<V>> {
    api: Arc<A>,
    map: Arc<RwLock<Arc<dyn CacheMap<V>>>>,
    coordinate: Coordinate,
    config: CacheConfig,
    api_options: ApiOptions,
    ttl: TtlManager,
    eviction: Option<Arc<EvictionManager>>,
    stats: StatsManager,
    events: EventEmitter,
    coalescer: Coalescer<Option<V>>,
    factory: Option<Arc<dyn CacheMapFactory<V>>>,
}

impl<V: Item, A: ItemApi<V>> Clone for Cache<V, A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            map: self.map.clone(),
            coordinate: self.coordinate.clone(),
            config: self.config.clone(),
            api_options: self.api_options.clone(),
            ttl: self.ttl.clone(),
            eviction: self.eviction.clone(),
            stats: self.stats.clone(),
            events: self.events.clone(),
            coalescer: self.coalescer.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<V: Item, A: ItemApi<V>> Cache<V, A> {
    /// Build a cache with the map selected by `config.cache_type`
    pub fn new(api: A, coordinate: Coordinate, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let map = create_cache_map(&config, coordinate.kta(), None)?;
        Ok(Self::assemble(api, coordinate, config, map, None))
    }

    /// Build with a custom cache map factory (required for
    /// `CacheType::Custom`; also used by `reset`).
    pub fn with_factory(
        api: A,
        coordinate: Coordinate,
        config: CacheConfig,
        factory: Arc<dyn CacheMapFactory<V>>,
    ) -> Result<Self> {
        config.validate()?;
        let map = create_cache_map(&config, coordinate.kta(), Some(factory.as_ref()))?;
        Ok(Self::assemble(api, coordinate, config, map, Some(factory)))
    }

    /// Build over an existing cache map instance
    pub fn with_cache_map(
        api: A,
        coordinate: Coordinate,
        config: CacheConfig,
        map: Box<dyn CacheMap<V>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(api, coordinate, config, map, None))
    }

    fn assemble(
        api: A,
        coordinate: Coordinate,
        config: CacheConfig,
        map: Box<dyn CacheMap<V>>,
        factory: Option<Arc<dyn CacheMapFactory<V>>>,
    ) -> Self {
        let ttl = TtlManager::new(config.ttl_config());
        let eviction = config
            .eviction
            .as_ref()
            .map(|e| Arc::new(EvictionManager::from_config(e)));
        let api_options = ApiOptions::from(&config);
        Self {
            api: Arc::new(api),
            map: Arc::new(RwLock::new(Arc::from(map))),
            coordinate,
            config,
            api_options,
            ttl,
            eviction,
            stats: StatsManager::new(),
            events: EventEmitter::new(),
            coalescer: Coalescer::new(),
            factory,
        }
    }

    /// Current cache map handle
    pub fn cache_map(&self) -> Arc<dyn CacheMap<V>> {
        self.map.read().clone()
    }

    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Subscribe to cache events; unsubscribe explicitly with the id
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Capabilities of this cache: the map's self-description merged with
    /// the configured TTL and eviction policy.
    pub fn cache_info(&self) -> CacheInfo {
        let mut info = self.cache_map().cache_info();
        info.default_ttl = self.ttl.default_ttl();
        info.eviction_policy = self
            .eviction
            .as_ref()
            .map(|e| e.policy_name().to_string());
        info
    }

    fn validate_key(&self, key: &ItemKey) -> Result<()> {
        if !key.is_valid() {
            return Err(CacheError::InvalidKey(normalize(key)));
        }
        if key.kt() != self.coordinate.pk_type() {
            return Err(CacheError::InvalidKey(format!(
                "key type '{}' does not match cache type '{}'",
                key.kt(),
                self.coordinate.pk_type()
            )));
        }
        Ok(())
    }

    fn validate_locations(&self, locations: &[LocKey]) -> Result<()> {
        if locations.len() > MAX_LOCATION_DEPTH {
            return Err(CacheError::InvalidKey(format!(
                "location depth {} exceeds the maximum of {MAX_LOCATION_DEPTH}",
                locations.len()
            )));
        }
        if locations
            .iter()
            .any(|l| l.kt.is_empty() || l.lk.is_empty())
        {
            return Err(CacheError::InvalidKey(
                "locations require non-empty tags and identifiers".to_string(),
            ));
        }
        Ok(())
    }

    /// Look an item up ignoring TTL, then expire it on observation if stale
    async fn lookup_fresh(
        &self,
        map: &Arc<dyn CacheMap<V>>,
        key: &ItemKey,
    ) -> Result<Option<V>> {
        let Some(item) = map.get(key).await? else {
            return Ok(None);
        };
        let hash = key_hash(key);
        let provider = map.metadata_provider();
        let fresh = match provider.get_metadata(&hash).await? {
            Some(meta) => self.ttl.validate_item(key, &meta),
            None => true,
        };
        if fresh {
            return Ok(Some(item));
        }

        debug!(key = %key, "stale entry expired on access");
        if let Some(eviction) = &self.eviction {
            if eviction.on_item_removed(&hash, &*provider).await.is_err() {
                self.stats.record_storage_error();
            }
        }
        map.delete(key).await?;
        Ok(None)
    }

    /// Stamp access metadata and notify the eviction strategy
    async fn touch_entry(&self, map: &Arc<dyn CacheMap<V>>, key: &ItemKey) -> Result<()> {
        let hash = key_hash(key);
        let provider = map.metadata_provider();
        if let Some(mut meta) = provider.get_metadata(&hash).await? {
            self.ttl.on_item_accessed(&mut meta);
            provider.set_metadata(&hash, meta).await?;
        }
        if let Some(eviction) = &self.eviction {
            eviction.on_item_accessed(&hash, &*provider).await?;
        }
        Ok(())
    }

    /// Write one authoritative item through the map, with eviction
    async fn cache_item(&self, item: &V) -> Result<()> {
        let key = item.key();
        let size = locache_core::estimated_size(item);
        let map = self.cache_map();

        if let Some(eviction) = &self.eviction {
            eviction
                .on_item_added(&key, size, &*map, &self.stats, &self.events)
                .await?;
        }
        map.set(&key, item.clone()).await?;
        if let Some(eviction) = &self.eviction {
            eviction
                .on_item_stored(&key_hash(&key), size, &*map.metadata_provider())
                .await?;
        }
        self.stats.record_set();
        self.events.emit(
            CacheEvent::new(CacheEventKind::ItemSet, EventSource::Operation).with_key(key),
        );
        Ok(())
    }

    /// Coalesced single-key API fetch that populates the cache on success
    async fn fetch_via_api(&self, key: &ItemKey) -> Result<Option<V>> {
        let api = self.api.clone();
        let key_for_fetch = key.clone();
        let result = self
            .coalescer
            .do_request(&normalize(key), move || async move {
                api.get(&key_for_fetch).await
            })
            .await;

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        match fetched {
            Some(item) => {
                if item.key().kt() != self.coordinate.pk_type() {
                    return Err(CacheError::InvalidKey(format!(
                        "api returned key type '{}' for cache type '{}'",
                        item.key().kt(),
                        self.coordinate.pk_type()
                    )));
                }
                self.cache_item(&item).await?;
                self.events.emit(
                    CacheEvent::new(CacheEventKind::ItemRetrieved, EventSource::Api)
                        .with_key(key.clone()),
                );
                Ok(Some(item))
            }
            // an API null is not cached
            None => Ok(None),
        }
    }

    async fn get_inner(&self, key: &ItemKey) -> Result<(Option<V>, RetrievalSource)> {
        self.validate_key(key)?;
        self.stats.record_request();

        if !self.config.bypass_cache {
            let map = self.cache_map();
            if let Some(item) = self.lookup_fresh(&map, key).await? {
                self.stats.record_hit();
                self.touch_entry(&map, key).await?;
                debug!(key = %key, "cache hit");
                self.events.emit(
                    CacheEvent::new(CacheEventKind::ItemRetrieved, EventSource::Cache)
                        .with_key(key.clone()),
                );
                return Ok((Some(item), RetrievalSource::Cache));
            }
        }

        self.stats.record_miss();
        debug!(key = %key, "cache miss");
        let fetched = self.fetch_via_api(key).await?;
        Ok((fetched, RetrievalSource::Api))
    }

    /// Fetch one item, cache-first
    pub async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        Ok(self.get_inner(key).await?.0)
    }

    /// Like `get`, but also reports whether the read refreshed from the API
    pub async fn retrieve(&self, key: &ItemKey) -> Result<Retrieval<V>> {
        let (value, source) = self.get_inner(key).await?;
        Ok(Retrieval { value, source })
    }

    /// Resolve a memoized query result when every referenced item is still
    /// fresh; otherwise report a miss.
    async fn cached_list(
        &self,
        map: &Arc<dyn CacheMap<V>>,
        hash: &str,
    ) -> Result<Option<Vec<V>>> {
        if self.config.bypass_cache {
            return Ok(None);
        }
        let Some(keys) = map.get_query_result(hash).await? else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.lookup_fresh(map, key).await? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }

    /// Write fetched items through and memoize the query result
    async fn finish_list(
        &self,
        map: &Arc<dyn CacheMap<V>>,
        hash: &str,
        items: &[V],
    ) -> Result<()> {
        for item in items {
            self.cache_item(item).await?;
        }
        let keys: Vec<ItemKey> = items.iter().map(|i| i.key()).collect();
        map.set_query_result(hash, &keys, self.ttl.query_ttl()).await
    }

    fn emit_query(&self, hash: &str, source: EventSource) {
        self.events.emit(
            CacheEvent::new(CacheEventKind::QueryExecuted, source).with_query_hash(hash),
        );
    }

    /// All items matching a query within a location scope
    pub async fn all(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>> {
        self.validate_locations(locations)?;
        self.stats.record_request();
        let hash = query_hash(query, locations);
        let map = self.cache_map();

        if let Some(items) = self.cached_list(&map, &hash).await? {
            self.stats.record_hit();
            self.emit_query(&hash, EventSource::Cache);
            return Ok(items);
        }

        self.stats.record_miss();
        let items = match self.api.all(query, &self.api_options, locations).await {
            Ok(items) => items,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        self.finish_list(&map, &hash, &items).await?;
        self.emit_query(&hash, EventSource::Api);
        Ok(items)
    }

    /// At most one item matching a query within a location scope
    pub async fn one(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Option<V>> {
        self.validate_locations(locations)?;
        self.stats.record_request();
        let hash = query_hash(query, locations);
        let map = self.cache_map();

        if let Some(items) = self.cached_list(&map, &hash).await? {
            self.stats.record_hit();
            self.emit_query(&hash, EventSource::Cache);
            return Ok(items.into_iter().next());
        }

        self.stats.record_miss();
        let item = match self.api.one(query, &self.api_options, locations).await {
            Ok(item) => item,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        let items: Vec<V> = item.clone().into_iter().collect();
        self.finish_list(&map, &hash, &items).await?;
        self.emit_query(&hash, EventSource::Api);
        Ok(item)
    }

    /// Invoke a named server-side finder, memoized like `all`
    pub async fn find(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        self.validate_locations(locations)?;
        self.stats.record_request();
        let hash = finder_hash(finder, params, locations);
        let map = self.cache_map();

        if let Some(items) = self.cached_list(&map, &hash).await? {
            self.stats.record_hit();
            self.emit_query(&hash, EventSource::Cache);
            return Ok(items);
        }

        self.stats.record_miss();
        let items = match self
            .api
            .find(finder, params, &self.api_options, locations)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        self.finish_list(&map, &hash, &items).await?;
        self.emit_query(&hash, EventSource::Api);
        Ok(items)
    }

    /// Clear the query-result subcache after a mutation that may have
    /// changed membership.
    async fn invalidate_queries(&self) -> Result<()> {
        self.cache_map().clear_query_results().await?;
        self.events.emit(CacheEvent::new(
            CacheEventKind::QueryInvalidated,
            EventSource::Operation,
        ));
        Ok(())
    }

    /// Create an item through the API and cache the authoritative result
    pub async fn create(&self, item: V, locations: &[LocKey]) -> Result<V> {
        self.validate_locations(locations)?;
        let created = match self.api.create(item, &self.api_options, locations).await {
            Ok(created) => created,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        self.validate_key(&created.key())?;
        self.cache_item(&created).await?;
        self.invalidate_queries().await?;
        Ok(created)
    }

    /// Update an item through the API and cache the authoritative result
    pub async fn update(&self, key: &ItemKey, item: V) -> Result<V> {
        self.validate_key(key)?;
        let updated = match self.api.update(key, item, &self.api_options).await {
            Ok(updated) => updated,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        self.cache_item(&updated).await?;
        self.invalidate_queries().await?;
        Ok(updated)
    }

    /// Remove an item through the API and drop it from the cache
    pub async fn remove(&self, key: &ItemKey) -> Result<()> {
        self.validate_key(key)?;
        if let Err(err) = self.api.remove(key, &self.api_options).await {
            self.stats.record_api_error();
            return Err(err);
        }

        let map = self.cache_map();
        let hash = key_hash(key);
        if let Some(eviction) = &self.eviction {
            if eviction
                .on_item_removed(&hash, &*map.metadata_provider())
                .await
                .is_err()
            {
                self.stats.record_storage_error();
            }
        }
        map.delete(key).await?;
        self.stats.record_delete();
        self.events.emit(
            CacheEvent::new(CacheEventKind::ItemDeleted, EventSource::Operation)
                .with_key(key.clone()),
        );
        self.invalidate_queries().await?;
        Ok(())
    }

    /// Invoke a named side-effectful action; the returned item is an
    /// authoritative refresh.
    pub async fn action(&self, key: &ItemKey, action: &str, body: &Value) -> Result<V> {
        self.validate_key(key)?;
        let refreshed = match self.api.action(key, action, body, &self.api_options).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        self.cache_item(&refreshed).await?;
        self.invalidate_queries().await?;
        Ok(refreshed)
    }

    /// Invoke a named bulk action within a location scope
    pub async fn all_action(
        &self,
        action: &str,
        body: &Value,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        self.validate_locations(locations)?;
        let items = match self
            .api
            .all_action(action, body, &self.api_options, locations)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                self.stats.record_api_error();
                return Err(err);
            }
        };
        for item in &items {
            self.cache_item(item).await?;
        }
        self.invalidate_queries().await?;
        Ok(items)
    }

    /// Discard the cache map and start from a fresh one built by the
    /// factory; used after schema or session changes.
    pub async fn reset(&self) -> Result<()> {
        self.config.validate()?;
        let fresh = create_cache_map(&self.config, self.coordinate.kta(), self.factory.as_deref())?;
        *self.map.write() = Arc::from(fresh);
        self.events.emit(CacheEvent::new(
            CacheEventKind::CacheReset,
            EventSource::Operation,
        ));
        Ok(())
    }
}
