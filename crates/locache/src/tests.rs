//! Integration tests for the cache operations and the aggregator

use crate::prelude::*;
use crate::{AggregateSpec, CacheMap, MemoryCacheMap};
use async_trait::async_trait;
use locache_core::{ApiOptions, ItemEvent, RefAggregate, key_hash, normalize};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    key: ItemKey,
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    refs: BTreeMap<String, ItemKey>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    events: BTreeMap<String, ItemEvent>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    aggs: BTreeMap<String, RefAggregate>,
}

impl Task {
    fn new(pk: impl Into<KeyId>, name: &str) -> Self {
        Self {
            key: ItemKey::primary("task", pk),
            name: name.to_string(),
            refs: BTreeMap::new(),
            events: BTreeMap::new(),
            aggs: BTreeMap::new(),
        }
    }

    fn scoped(pk: impl Into<KeyId>, loc: Vec<LocKey>, name: &str) -> Self {
        Self {
            key: ItemKey::composite("task", pk, loc),
            ..Self::new(0, name)
        }
    }
}

impl Item for Task {
    fn key(&self) -> ItemKey {
        self.key.clone()
    }

    fn refs(&self) -> BTreeMap<String, ItemKey> {
        self.refs.clone()
    }

    fn events(&self) -> BTreeMap<String, ItemEvent> {
        self.events.clone()
    }

    fn set_ref_aggregate(&mut self, name: &str, agg: RefAggregate) {
        self.aggs.insert(name.to_string(), agg);
    }

    fn set_event_aggregate(&mut self, name: &str, resolved: Value) {
        if let Some(event) = self.events.get_mut(name) {
            event.agg = Some(resolved);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    key: ItemKey,
    name: String,
}

impl User {
    fn new(pk: impl Into<KeyId>, name: &str) -> Self {
        Self {
            key: ItemKey::primary("user", pk),
            name: name.to_string(),
        }
    }
}

impl Item for User {
    fn key(&self) -> ItemKey {
        self.key.clone()
    }
}

/// In-memory API double with call counting and failure injection
struct MockApi<V: Item> {
    items: Mutex<HashMap<String, V>>,
    get_calls: AtomicUsize,
    all_calls: AtomicUsize,
    one_calls: AtomicUsize,
    find_calls: AtomicUsize,
    create_calls: AtomicUsize,
    action_calls: AtomicUsize,
    fail: AtomicBool,
    get_delay_ms: AtomicU64,
}

impl<V: Item> MockApi<V> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(HashMap::new()),
            get_calls: AtomicUsize::new(0),
            all_calls: AtomicUsize::new(0),
            one_calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            action_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            get_delay_ms: AtomicU64::new(0),
        })
    }

    fn seed(self: &Arc<Self>, items: impl IntoIterator<Item = V>) -> Arc<Self> {
        let mut stored = self.items.lock();
        for item in items {
            stored.insert(normalize(&item.key()), item);
        }
        drop(stored);
        self.clone()
    }

    fn check_fail(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CacheError::ApiFailure("injected".to_string()))
        } else {
            Ok(())
        }
    }

    fn matching(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>> {
        let mut out: Vec<(String, V)> = self
            .items
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut matched = Vec::new();
        for (_, item) in out {
            if !locations.is_empty() && !locache_core::loc_equals(item.key().loc(), locations) {
                continue;
            }
            let as_value = serde_json::to_value(&item).map_err(CacheError::serde)?;
            if query.matches(&as_value) {
                matched.push(item);
            }
        }
        Ok(query.window(matched))
    }
}

#[async_trait]
impl<V: Item> ItemApi<V> for MockApi<V> {
    async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        let delay = self.get_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.items.lock().get(&normalize(key)).cloned())
    }

    async fn all(
        &self,
        query: &ItemQuery,
        _options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        self.matching(query, locations)
    }

    async fn one(
        &self,
        query: &ItemQuery,
        _options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Option<V>> {
        self.one_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        Ok(self.matching(query, locations)?.into_iter().next())
    }

    async fn find(
        &self,
        _finder: &str,
        params: &Value,
        _options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        let mut query = ItemQuery::new();
        if let Some(name) = params.get("name") {
            query = query.filter("name", name.clone());
        }
        self.matching(&query, locations)
    }

    async fn create(&self, item: V, _options: &ApiOptions, _locations: &[LocKey]) -> Result<V> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        self.items
            .lock()
            .insert(normalize(&item.key()), item.clone());
        Ok(item)
    }

    async fn update(&self, key: &ItemKey, item: V, _options: &ApiOptions) -> Result<V> {
        self.check_fail()?;
        self.items.lock().insert(normalize(key), item.clone());
        Ok(item)
    }

    async fn remove(&self, key: &ItemKey, _options: &ApiOptions) -> Result<()> {
        self.check_fail()?;
        self.items.lock().remove(&normalize(key));
        Ok(())
    }

    async fn action(
        &self,
        key: &ItemKey,
        _action: &str,
        _body: &Value,
        _options: &ApiOptions,
    ) -> Result<V> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        self.items
            .lock()
            .get(&normalize(key))
            .cloned()
            .ok_or_else(|| CacheError::NotFound(normalize(key)))
    }

    async fn all_action(
        &self,
        _action: &str,
        _body: &Value,
        _options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        self.check_fail()?;
        self.matching(&ItemQuery::new(), locations)
    }
}

fn task_cache(api: Arc<MockApi<Task>>, config: CacheConfig) -> Cache<Task, Arc<MockApi<Task>>> {
    Cache::new(api, Coordinate::primary("task").unwrap(), config).unwrap()
}

// --- single-key reads ---------------------------------------------------

#[tokio::test]
async fn test_cache_hit_serves_without_api_call() {
    let api = MockApi::<Task>::new();
    let cache = task_cache(api.clone(), CacheConfig::default());

    let t = Task::new("1", "first");
    cache.cache_map().set(&t.key(), t.clone()).await.unwrap();

    // numeric pk normalizes to the stored string form
    let got = cache.get(&ItemKey::primary("task", 1)).await.unwrap();
    assert_eq!(got, Some(t));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cache_miss_populates_then_hits_until_ttl() {
    let api = MockApi::new().seed([Task::new(1, "one")]);
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(80))
        .build()
        .unwrap();
    let cache = task_cache(api.clone(), config);
    let key = ItemKey::primary("task", 1);

    assert!(cache.get(&key).await.unwrap().is_some());
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);

    // within TTL: served from cache
    assert!(cache.get(&key).await.unwrap().is_some());
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);

    // past TTL: the stale entry expires on access and the API is asked again
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get(&key).await.unwrap().is_some());
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 2);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn test_api_null_is_returned_and_not_cached() {
    let api = MockApi::<Task>::new();
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 404);

    assert!(cache.get(&key).await.unwrap().is_none());
    assert!(cache.get(&key).await.unwrap().is_none());
    // absence is not cached: both reads reached the API
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 2);
    assert!(!cache.cache_map().includes_key(&key).await.unwrap());
}

#[tokio::test]
async fn test_retrieve_reports_refresh_status() {
    let api = MockApi::new().seed([Task::new(1, "one")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 1);

    let first = cache.retrieve(&key).await.unwrap();
    assert!(first.refreshed());
    assert_eq!(first.source, RetrievalSource::Api);

    let second = cache.retrieve(&key).await.unwrap();
    assert!(!second.refreshed());
    assert_eq!(second.source, RetrievalSource::Cache);
}

#[tokio::test]
async fn test_invalid_key_fails_before_any_api_call() {
    let api = MockApi::<Task>::new();
    let cache = task_cache(api.clone(), CacheConfig::default());

    let wrong_type = ItemKey::primary("user", 1);
    assert!(matches!(
        cache.get(&wrong_type).await,
        Err(CacheError::InvalidKey(_))
    ));

    let empty_pk = ItemKey::primary("task", "");
    assert!(matches!(
        cache.get(&empty_pk).await,
        Err(CacheError::InvalidKey(_))
    ));

    let too_deep = ItemKey::composite(
        "task",
        1,
        (0..6).map(|i| LocKey::new("l", i as i64)).collect(),
    );
    assert!(matches!(
        cache.get(&too_deep).await,
        Err(CacheError::InvalidKey(_))
    ));

    assert_eq!(api.get_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_api_failure_propagates_and_counts() {
    let api = MockApi::<Task>::new();
    api.fail.store(true, Ordering::SeqCst);
    let cache = task_cache(api.clone(), CacheConfig::default());

    let err = cache.get(&ItemKey::primary("task", 1)).await.unwrap_err();
    assert!(matches!(err, CacheError::ApiFailure(_)));
    assert_eq!(cache.stats().api_errors, 1);
    assert!(cache.cache_map().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bypass_cache_always_fetches() {
    let api = MockApi::new().seed([Task::new(1, "one")]);
    let config = CacheConfig::builder().bypass_cache(true).build().unwrap();
    let cache = task_cache(api.clone(), config);
    let key = ItemKey::primary("task", 1);

    cache.get(&key).await.unwrap();
    cache.get(&key).await.unwrap();
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_gets_coalesce_to_one_api_call() {
    let api = MockApi::new().seed([Task::new(1, "one")]);
    api.get_delay_ms.store(30, Ordering::SeqCst);
    let cache = task_cache(api.clone(), CacheConfig::default());

    // logically equal keys of different scalar types share one flight
    let numeric = ItemKey::primary("task", 1);
    let stringly = ItemKey::primary("task", "1");
    let (a, b) = tokio::join!(cache.get(&numeric), cache.get(&stringly));

    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);
}

// --- queries ------------------------------------------------------------

#[tokio::test]
async fn test_all_memoizes_query_results() {
    let api = MockApi::new().seed([Task::new(1, "a"), Task::new(2, "b"), Task::new(3, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let query = ItemQuery::new().filter("name", "a");

    let first = cache.all(&query, &[]).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 1);

    // memoized: served from the query-result subcache
    let second = cache.all(&query, &[]).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 1);

    // a different query fetches
    cache
        .all(&ItemQuery::new().filter("name", "b"), &[])
        .await
        .unwrap();
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_all_refetches_when_a_referenced_item_expired() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(60))
        .query_ttl(Duration::from_secs(3600))
        .build()
        .unwrap();
    let cache = task_cache(api.clone(), config);
    let query = ItemQuery::new().filter("name", "a");

    cache.all(&query, &[]).await.unwrap();
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 1);

    // the query memo is alive but the item behind it expired
    tokio::time::sleep(Duration::from_millis(90)).await;
    cache.all(&query, &[]).await.unwrap();
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_query_result_ttl_expires_the_memo() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let config = CacheConfig::builder()
        .query_ttl(Duration::from_millis(40))
        .build()
        .unwrap();
    let cache = task_cache(api.clone(), config);
    let query = ItemQuery::new().filter("name", "a");

    cache.all(&query, &[]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(70)).await;
    cache.all(&query, &[]).await.unwrap();
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_one_caches_zero_and_one_results() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());

    let hit = cache
        .one(&ItemQuery::new().filter("name", "a"), &[])
        .await
        .unwrap();
    assert!(hit.is_some());
    cache
        .one(&ItemQuery::new().filter("name", "a"), &[])
        .await
        .unwrap();
    assert_eq!(api.one_calls.load(Ordering::SeqCst), 1);

    // a zero result is memoized too
    let miss = cache
        .one(&ItemQuery::new().filter("name", "zzz"), &[])
        .await
        .unwrap();
    assert!(miss.is_none());
    cache
        .one(&ItemQuery::new().filter("name", "zzz"), &[])
        .await
        .unwrap();
    assert_eq!(api.one_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_find_memoizes_by_finder_and_params() {
    let api = MockApi::new().seed([Task::new(1, "a"), Task::new(2, "b")]);
    let cache = task_cache(api.clone(), CacheConfig::default());

    let found = cache
        .find("by_name", &json!({"name": "a"}), &[])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    cache
        .find("by_name", &json!({"name": "a"}), &[])
        .await
        .unwrap();
    assert_eq!(api.find_calls.load(Ordering::SeqCst), 1);

    cache
        .find("by_name", &json!({"name": "b"}), &[])
        .await
        .unwrap();
    assert_eq!(api.find_calls.load(Ordering::SeqCst), 2);
}

// --- mutations ----------------------------------------------------------

#[tokio::test]
async fn test_create_invalidates_query_results() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let query = ItemQuery::new().filter("name", "a");

    let first = cache.all(&query, &[]).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 1);

    cache.create(Task::new(2, "a"), &[]).await.unwrap();

    // the memoized query was invalidated; the refetch sees both items
    let second = cache.all(&query, &[]).await.unwrap();
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 2);
    let keys: Vec<ItemKey> = second.iter().map(|t| t.key()).collect();
    assert!(keys.contains(&ItemKey::primary("task", 1)));
    assert!(keys.contains(&ItemKey::primary("task", 2)));
}

#[tokio::test]
async fn test_update_refreshes_cache_entry() {
    let api = MockApi::new().seed([Task::new(1, "old")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 1);

    cache.get(&key).await.unwrap();
    let updated = cache.update(&key, Task::new(1, "new")).await.unwrap();
    assert_eq!(updated.name, "new");

    // the refreshed entry is a cache hit with the new payload
    let got = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(got.name, "new");
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remove_deletes_and_invalidates() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 1);

    cache.get(&key).await.unwrap();
    cache.all(&ItemQuery::new(), &[]).await.unwrap();

    cache.remove(&key).await.unwrap();
    assert!(!cache.cache_map().includes_key(&key).await.unwrap());
    assert_eq!(cache.stats().delete_ops, 1);

    // next read goes back to the API and finds nothing
    assert!(cache.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_action_refreshes_from_authoritative_response() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 1);

    let refreshed = cache.action(&key, "ping", &json!({})).await.unwrap();
    assert_eq!(refreshed.key(), key);
    assert_eq!(api.action_calls.load(Ordering::SeqCst), 1);
    assert!(cache.cache_map().includes_key(&key).await.unwrap());
}

#[tokio::test]
async fn test_all_action_caches_every_returned_item() {
    let api = MockApi::new().seed([Task::new(1, "a"), Task::new(2, "b")]);
    let cache = task_cache(api.clone(), CacheConfig::default());

    let touched = cache.all_action("sync", &json!({}), &[]).await.unwrap();
    assert_eq!(touched.len(), 2);
    for task in &touched {
        assert!(cache.cache_map().includes_key(&task.key()).await.unwrap());
    }
}

#[tokio::test]
async fn test_failed_mutation_leaves_cache_unchanged() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 1);
    cache.get(&key).await.unwrap();

    api.fail.store(true, Ordering::SeqCst);
    assert!(cache.update(&key, Task::new(1, "broken")).await.is_err());
    assert!(cache.remove(&key).await.is_err());
    api.fail.store(false, Ordering::SeqCst);

    let cached = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(cached.name, "a");
    assert_eq!(cache.stats().api_errors, 2);
}

// --- eviction through operations ---------------------------------------

#[tokio::test]
async fn test_lru_eviction_on_write_through() {
    let api = MockApi::new().seed([
        Task::new("a", "a"),
        Task::new("b", "b"),
        Task::new("c", "c"),
        Task::new("d", "d"),
    ]);
    let config = CacheConfig::builder()
        .cache_type(CacheType::EnhancedMemory)
        .max_items(3)
        .eviction(EvictionConfig::Lru)
        .build()
        .unwrap();
    let cache = task_cache(api.clone(), config);

    for pk in ["a", "b", "c"] {
        cache.get(&ItemKey::primary("task", pk)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // touch A so B is the coldest entry
    cache.get(&ItemKey::primary("task", "a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;

    cache.get(&ItemKey::primary("task", "d")).await.unwrap();

    let map = cache.cache_map();
    assert!(map.includes_key(&ItemKey::primary("task", "a")).await.unwrap());
    assert!(!map.includes_key(&ItemKey::primary("task", "b")).await.unwrap());
    assert!(map.includes_key(&ItemKey::primary("task", "c")).await.unwrap());
    assert!(map.includes_key(&ItemKey::primary("task", "d")).await.unwrap());
    assert_eq!(cache.stats().evictions, 1);
}

// --- events and reset ---------------------------------------------------

#[tokio::test]
async fn test_events_cover_the_operation_lifecycle() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cl = seen.clone();
    let sub = cache.subscribe(move |ev| {
        seen_cl.lock().push(ev.kind);
    });

    let key = ItemKey::primary("task", 1);
    cache.get(&key).await.unwrap(); // miss: set + retrieved(api)
    cache.get(&key).await.unwrap(); // hit: retrieved(cache)
    cache.all(&ItemQuery::new(), &[]).await.unwrap();
    cache.remove(&key).await.unwrap();
    cache.reset().await.unwrap();

    let kinds = seen.lock().clone();
    assert!(kinds.contains(&CacheEventKind::ItemSet));
    assert!(kinds.contains(&CacheEventKind::ItemRetrieved));
    assert!(kinds.contains(&CacheEventKind::QueryExecuted));
    assert!(kinds.contains(&CacheEventKind::ItemDeleted));
    assert!(kinds.contains(&CacheEventKind::QueryInvalidated));
    assert!(kinds.contains(&CacheEventKind::CacheReset));

    assert!(cache.unsubscribe(sub));
}

#[tokio::test]
async fn test_reset_discards_cached_state() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api.clone(), CacheConfig::default());
    let key = ItemKey::primary("task", 1);

    cache.get(&key).await.unwrap();
    assert!(cache.cache_map().includes_key(&key).await.unwrap());

    cache.reset().await.unwrap();
    assert!(cache.cache_map().keys().await.unwrap().is_empty());

    // next read repopulates from the API
    cache.get(&key).await.unwrap();
    assert_eq!(api.get_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_info_reflects_configuration() {
    let api = MockApi::<Task>::new();
    let config = CacheConfig::builder()
        .cache_type(CacheType::EnhancedMemory)
        .ttl(Duration::from_secs(60))
        .max_items(10)
        .eviction(EvictionConfig::TwoQueue(Default::default()))
        .build()
        .unwrap();
    let cache = task_cache(api, config);

    let info = cache.cache_info();
    assert_eq!(info.implementation_type, "memory/enhanced");
    assert!(info.supports_ttl);
    assert!(info.supports_eviction);
    assert_eq!(info.default_ttl, Some(Duration::from_secs(60)));
    assert_eq!(info.eviction_policy.as_deref(), Some("2q"));
}

#[tokio::test]
async fn test_custom_cache_type_requires_factory() {
    let api = MockApi::<Task>::new();
    let config = CacheConfig::builder()
        .cache_type(CacheType::Custom)
        .build()
        .unwrap();
    let err = match Cache::new(api, Coordinate::primary("task").unwrap(), config) {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert!(matches!(err, CacheError::ConfigInvalid(_)));
}

#[tokio::test]
async fn test_custom_factory_backs_the_cache() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let config = CacheConfig::builder()
        .cache_type(CacheType::Custom)
        .build()
        .unwrap();
    let factory = Arc::new(
        |_kta: &[String]| -> Result<Box<dyn CacheMap<Task>>> {
            Ok(Box::new(MemoryCacheMap::new()))
        },
    );
    let cache = Cache::with_factory(api, Coordinate::primary("task").unwrap(), config, factory)
        .unwrap();

    let key = ItemKey::primary("task", 1);
    cache.get(&key).await.unwrap();
    assert!(cache.cache_map().includes_key(&key).await.unwrap());
    cache.reset().await.unwrap();
    assert!(cache.cache_map().keys().await.unwrap().is_empty());
}

// --- location scoping ---------------------------------------------------

#[tokio::test]
async fn test_location_scoped_queries() {
    let org1 = vec![LocKey::new("org", 1)];
    let org2 = vec![LocKey::new("org", 2)];
    let api = MockApi::new().seed([
        Task::scoped(1, org1.clone(), "a"),
        Task::scoped(2, org2.clone(), "a"),
    ]);
    let cache = task_cache(api.clone(), CacheConfig::default());

    let in_org1 = cache
        .all(&ItemQuery::new().filter("name", "a"), &org1)
        .await
        .unwrap();
    assert_eq!(in_org1.len(), 1);
    assert_eq!(in_org1[0].key().loc(), org1.as_slice());

    // scope is part of the memo key
    cache
        .all(&ItemQuery::new().filter("name", "a"), &org2)
        .await
        .unwrap();
    assert_eq!(api.all_calls.load(Ordering::SeqCst), 2);
}

// --- aggregator ---------------------------------------------------------

fn user_cache(api: Arc<MockApi<User>>) -> Cache<User, Arc<MockApi<User>>> {
    Cache::new(api, Coordinate::primary("user").unwrap(), CacheConfig::default()).unwrap()
}

#[tokio::test]
async fn test_aggregator_populates_refs_and_events() {
    let owner = User::new(7, "ada");
    let users = user_cache(MockApi::new().seed([owner.clone()]));

    let mut task = Task::new(1, "write");
    task.refs.insert("owner".to_string(), owner.key());
    task.events.insert(
        "created".to_string(),
        ItemEvent {
            at: Some(1000),
            by: Some(owner.key()),
            agg: None,
        },
    );
    let tasks = task_cache(MockApi::new().seed([task]), CacheConfig::default());

    let users = Arc::new(users);
    let aggregator = Aggregator::new(tasks)
        .aggregate("owner", AggregateSpec::required(users.clone()))
        .event("created", AggregateSpec::required(users));

    let populated = aggregator
        .get(&ItemKey::primary("task", 1))
        .await
        .unwrap()
        .unwrap();

    // for every configured ref, the attached aggregate mirrors the ref key
    let agg = populated.aggs.get("owner").unwrap();
    assert_eq!(agg.key, populated.refs.get("owner").unwrap().clone());
    assert_eq!(agg.item["name"], "ada");

    let event = populated.events.get("created").unwrap();
    assert_eq!(event.agg.as_ref().unwrap()["name"], "ada");
}

#[tokio::test]
async fn test_aggregator_missing_required_ref_fails() {
    let users = Arc::new(user_cache(MockApi::new()));
    let tasks = task_cache(
        MockApi::new().seed([Task::new(1, "bare")]),
        CacheConfig::default(),
    );

    let aggregator =
        Aggregator::new(tasks).aggregate("owner", AggregateSpec::required(users));
    let err = aggregator
        .get(&ItemKey::primary("task", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::MissingRef { .. }));
}

#[tokio::test]
async fn test_aggregator_optional_slots_are_skipped() {
    let users = Arc::new(user_cache(MockApi::new()));
    let tasks = task_cache(
        MockApi::new().seed([Task::new(1, "bare")]),
        CacheConfig::default(),
    );

    let aggregator = Aggregator::new(tasks)
        .aggregate("owner", AggregateSpec::optional(users.clone()))
        .event("created", AggregateSpec::optional(users));

    let populated = aggregator
        .get(&ItemKey::primary("task", 1))
        .await
        .unwrap()
        .unwrap();
    assert!(populated.aggs.is_empty());
}

#[tokio::test]
async fn test_aggregator_event_requires_by_key() {
    let users = Arc::new(user_cache(MockApi::new()));

    let mut task = Task::new(1, "orphan");
    task.events
        .insert("created".to_string(), ItemEvent::default());
    let tasks = task_cache(MockApi::new().seed([task]), CacheConfig::default());

    // even an optional slot fails when the event exists without an actor
    let aggregator = Aggregator::new(tasks).event("created", AggregateSpec::optional(users));
    let err = aggregator
        .get(&ItemKey::primary("task", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::MissingEvent { .. }));
}

#[tokio::test]
async fn test_aggregator_populates_lists() {
    let owner = User::new(7, "ada");
    let users = Arc::new(user_cache(MockApi::new().seed([owner.clone()])));

    let mut t1 = Task::new(1, "a");
    t1.refs.insert("owner".to_string(), owner.key());
    let mut t2 = Task::new(2, "a");
    t2.refs.insert("owner".to_string(), owner.key());
    let tasks = task_cache(MockApi::new().seed([t1, t2]), CacheConfig::default());

    let aggregator = Aggregator::new(tasks).aggregate("owner", AggregateSpec::required(users));
    let populated = aggregator
        .all(&ItemQuery::new().filter("name", "a"), &[])
        .await
        .unwrap();
    assert_eq!(populated.len(), 2);
    for task in &populated {
        assert!(task.aggs.contains_key("owner"));
    }
}

// --- metadata bookkeeping through operations ----------------------------

#[tokio::test]
async fn test_reads_update_access_metadata() {
    let api = MockApi::new().seed([Task::new(1, "a")]);
    let cache = task_cache(api, CacheConfig::default());
    let key = ItemKey::primary("task", 1);

    cache.get(&key).await.unwrap();
    cache.get(&key).await.unwrap();
    cache.get(&key).await.unwrap();

    let provider = cache.cache_map().metadata_provider();
    let meta = provider
        .get_metadata(&key_hash(&key))
        .await
        .unwrap()
        .unwrap();
    // the fetch created the record; the two hits touched it
    assert_eq!(meta.access_count, 2);
}
