//! Least-recently-used eviction

use async_trait::async_trait;
use locache_core::{ItemMetadata, Result};
use locache_storage::MetadataProvider;

use crate::{EvictionContext, EvictionStrategy, take_victims};

/// Evicts the entry with the oldest last access. Ties break by key string.
pub struct LruStrategy;

#[async_trait]
impl EvictionStrategy for LruStrategy {
    fn name(&self) -> &'static str {
        "lru"
    }

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>> {
        let mut entries: Vec<(String, ItemMetadata)> =
            provider.all_metadata().await?.into_iter().collect();
        entries.sort_by(|(ha, a), (hb, b)| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then(ha.cmp(hb))
        });
        let ordered = entries
            .into_iter()
            .map(|(hash, meta)| (hash, meta.estimated_size))
            .collect();
        Ok(take_victims(ordered, ctx))
    }

    async fn on_item_added(
        &self,
        _hash: &str,
        _estimated_size: usize,
        _provider: &dyn MetadataProvider,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_item_accessed(&self, _hash: &str, _provider: &dyn MetadataProvider) -> Result<()> {
        Ok(())
    }

    async fn on_item_removed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()> {
        provider.delete_metadata(hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{meta, provider, seed};
    use locache_core::{CacheSize, SizeLimits};

    fn pressure(item_count: usize, max_items: usize) -> EvictionContext {
        EvictionContext {
            current: CacheSize {
                item_count,
                size_bytes: 0,
            },
            limits: SizeLimits {
                max_items: Some(max_items),
                max_size_bytes: None,
            },
            new_item_size: Some(1),
        }
    }

    #[tokio::test]
    async fn test_evicts_least_recently_accessed() {
        let p = provider();
        seed(&p, "a", meta(1, 100, 500, 3, 1)).await;
        seed(&p, "b", meta(2, 200, 100, 1, 1)).await;
        seed(&p, "c", meta(3, 300, 900, 2, 1)).await;

        let victims = LruStrategy
            .select_for_eviction(&*p, &pressure(3, 3))
            .await
            .unwrap();
        assert_eq!(victims, vec!["b"]);
    }

    #[tokio::test]
    async fn test_orders_multiple_victims_coldest_first() {
        let p = provider();
        for (hash, accessed) in [("a", 400u64), ("b", 100), ("c", 300), ("d", 200)] {
            seed(&p, hash, meta(1, 50, accessed, 0, 1)).await;
        }

        // two over the bound
        let ctx = EvictionContext {
            current: CacheSize {
                item_count: 4,
                size_bytes: 0,
            },
            limits: SizeLimits {
                max_items: Some(3),
                max_size_bytes: None,
            },
            new_item_size: Some(1),
        };
        let victims = LruStrategy.select_for_eviction(&*p, &ctx).await.unwrap();
        assert_eq!(victims, vec!["b", "d"]);
    }
}
