//! The eviction manager: the one caller allowed to apply strategy decisions

use locache_core::{
    CacheEvent, CacheEventKind, EventEmitter, EventSource, EvictionConfig, Item, ItemKey, Result,
    StatsManager, key_hash,
};
use locache_storage::{CacheMap, MetadataProvider};
use tracing::{debug, warn};

use crate::{EvictionContext, EvictionStrategy, strategy_from_config};

/// Composes one strategy with a cache map's metadata provider and limits.
///
/// Victim selection runs before an insert, so the context carries the
/// pre-insert occupancy plus the incoming item's size. A victim that fails
/// to delete is logged and counted as a storage error; it never fails the
/// triggering operation.
pub struct EvictionManager {
    strategy: Box<dyn EvictionStrategy>,
}

impl EvictionManager {
    pub fn new(strategy: Box<dyn EvictionStrategy>) -> Self {
        Self { strategy }
    }

    pub fn from_config(config: &EvictionConfig) -> Self {
        Self::new(strategy_from_config(config))
    }

    pub fn policy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Make room for an incoming item, deleting victims from the map.
    /// Call before storing the item; returns the evicted keys.
    pub async fn on_item_added<V: Item>(
        &self,
        incoming: &ItemKey,
        estimated_size: usize,
        map: &dyn CacheMap<V>,
        stats: &StatsManager,
        events: &EventEmitter,
    ) -> Result<Vec<ItemKey>> {
        let provider = map.metadata_provider();
        let ctx = EvictionContext {
            current: provider.current_size().await?,
            limits: provider.size_limits(),
            new_item_size: Some(estimated_size),
        };
        if !ctx.over_limit() {
            return Ok(Vec::new());
        }

        let incoming_hash = key_hash(incoming);
        let victims = self.strategy.select_for_eviction(&*provider, &ctx).await?;
        debug!(
            policy = self.strategy.name(),
            victims = victims.len(),
            "eviction pass"
        );

        let mut evicted = Vec::new();
        for hash in victims {
            // a replacing set must never evict the key being written
            if hash == incoming_hash {
                continue;
            }
            let Some(meta) = provider.get_metadata(&hash).await? else {
                continue;
            };
            let key = meta.key.clone();
            if let Err(err) = self.strategy.on_item_removed(&hash, &*provider).await {
                warn!(%err, "strategy removal hook failed");
                stats.record_storage_error();
            }
            match map.delete(&key).await {
                Ok(()) => {
                    stats.record_eviction();
                    events.emit(
                        CacheEvent::new(CacheEventKind::ItemEvicted, EventSource::Cache)
                            .with_key(key.clone()),
                    );
                    evicted.push(key);
                }
                Err(err) => {
                    warn!(%err, "failed to delete eviction victim");
                    stats.record_storage_error();
                }
            }
        }
        Ok(evicted)
    }

    /// Forward the strategy's bookkeeping once the item and its metadata
    /// are stored.
    pub async fn on_item_stored(
        &self,
        hash: &str,
        estimated_size: usize,
        provider: &dyn MetadataProvider,
    ) -> Result<()> {
        self.strategy
            .on_item_added(hash, estimated_size, provider)
            .await
    }

    pub async fn on_item_accessed(
        &self,
        hash: &str,
        provider: &dyn MetadataProvider,
    ) -> Result<()> {
        self.strategy.on_item_accessed(hash, provider).await
    }

    pub async fn on_item_removed(
        &self,
        hash: &str,
        provider: &dyn MetadataProvider,
    ) -> Result<()> {
        self.strategy.on_item_removed(hash, provider).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locache_core::{ItemKey, SizeLimits};
    use locache_storage::EnhancedMemoryCacheMap;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Unit {
        key: ItemKey,
        label: String,
    }

    impl Item for Unit {
        fn key(&self) -> ItemKey {
            self.key.clone()
        }
    }

    fn unit(pk: &str) -> Unit {
        Unit {
            key: ItemKey::primary("unit", pk),
            label: pk.to_string(),
        }
    }

    async fn insert(
        manager: &EvictionManager,
        map: &EnhancedMemoryCacheMap<Unit>,
        stats: &StatsManager,
        events: &EventEmitter,
        item: &Unit,
    ) -> Vec<ItemKey> {
        let size = locache_core::estimated_size(item);
        let evicted = manager
            .on_item_added(&item.key(), size, map, stats, events)
            .await
            .unwrap();
        map.set(&item.key(), item.clone()).await.unwrap();
        manager
            .on_item_stored(&key_hash(&item.key()), size, &*map.metadata_provider())
            .await
            .unwrap();
        evicted
    }

    #[tokio::test]
    async fn test_lru_eviction_under_item_bound() {
        let map: EnhancedMemoryCacheMap<Unit> = EnhancedMemoryCacheMap::new(SizeLimits {
            max_items: Some(3),
            max_size_bytes: None,
        });
        let manager = EvictionManager::from_config(&EvictionConfig::Lru);
        let stats = StatsManager::new();
        let events = EventEmitter::new();

        let (a, b, c, d) = (unit("a"), unit("b"), unit("c"), unit("d"));
        insert(&manager, &map, &stats, &events, &a).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        insert(&manager, &map, &stats, &events, &b).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        insert(&manager, &map, &stats, &events, &c).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        // touch A so B becomes the coldest
        let provider = map.metadata_provider();
        let hash_a = key_hash(&a.key());
        let mut meta = provider.get_metadata(&hash_a).await.unwrap().unwrap();
        meta.touch();
        provider.set_metadata(&hash_a, meta).await.unwrap();
        manager.on_item_accessed(&hash_a, &*provider).await.unwrap();

        let evicted = insert(&manager, &map, &stats, &events, &d).await;
        assert_eq!(evicted, vec![b.key()]);

        assert!(map.get(&a.key()).await.unwrap().is_some());
        assert!(map.get(&b.key()).await.unwrap().is_none());
        assert!(map.get(&c.key()).await.unwrap().is_some());
        assert!(map.get(&d.key()).await.unwrap().is_some());
        assert_eq!(stats.snapshot().evictions, 1);
    }

    #[tokio::test]
    async fn test_no_eviction_below_limits() {
        let map: EnhancedMemoryCacheMap<Unit> = EnhancedMemoryCacheMap::new(SizeLimits {
            max_items: Some(10),
            max_size_bytes: None,
        });
        let manager = EvictionManager::from_config(&EvictionConfig::Fifo);
        let stats = StatsManager::new();
        let events = EventEmitter::new();

        let evicted = insert(&manager, &map, &stats, &events, &unit("a")).await;
        assert!(evicted.is_empty());
        assert_eq!(stats.snapshot().evictions, 0);
    }

    #[tokio::test]
    async fn test_emits_item_evicted_events() {
        let map: EnhancedMemoryCacheMap<Unit> = EnhancedMemoryCacheMap::new(SizeLimits {
            max_items: Some(1),
            max_size_bytes: None,
        });
        let manager = EvictionManager::from_config(&EvictionConfig::Fifo);
        let stats = StatsManager::new();
        let events = EventEmitter::new();

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_cl = seen.clone();
        events.subscribe(move |ev| {
            if ev.kind == CacheEventKind::ItemEvicted {
                seen_cl.lock().push(ev.key.clone());
            }
        });

        insert(&manager, &map, &stats, &events, &unit("a")).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        insert(&manager, &map, &stats, &events, &unit("b")).await;

        assert_eq!(seen.lock().as_slice(), &[Some(unit("a").key())]);
    }

    #[tokio::test]
    async fn test_after_eviction_limits_hold() {
        let map: EnhancedMemoryCacheMap<Unit> = EnhancedMemoryCacheMap::new(SizeLimits {
            max_items: Some(2),
            max_size_bytes: None,
        });
        let manager = EvictionManager::from_config(&EvictionConfig::Lru);
        let stats = StatsManager::new();
        let events = EventEmitter::new();

        for pk in ["a", "b", "c", "d", "e"] {
            insert(&manager, &map, &stats, &events, &unit(pk)).await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            let size = map.metadata_provider().current_size().await.unwrap();
            assert!(size.item_count <= 2);
        }
        assert_eq!(stats.snapshot().evictions, 3);
    }
}
