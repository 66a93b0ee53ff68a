//! Uniform random eviction

use async_trait::async_trait;
use locache_core::Result;
use locache_storage::MetadataProvider;
use rand::seq::SliceRandom;

use crate::{EvictionContext, EvictionStrategy, take_victims};

/// Picks victims uniformly without replacement from the keyset
pub struct RandomStrategy;

#[async_trait]
impl EvictionStrategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>> {
        let mut entries: Vec<(String, usize)> = provider
            .all_metadata()
            .await?
            .into_iter()
            .map(|(hash, meta)| (hash, meta.estimated_size))
            .collect();
        entries.shuffle(&mut rand::rng());
        Ok(take_victims(entries, ctx))
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

    #[tokio::test]
    async fn test_selects_only_known_keys_and_right_count() {
        let p = provider();
        for i in 0..5 {
            seed(&p, &format!("k{i}"), meta(i, 100, 100, 0, 1)).await;
        }

        let ctx = EvictionContext {
            current: CacheSize {
                item_count: 5,
                size_bytes: 0,
            },
            limits: SizeLimits {
                max_items: Some(4),
                max_size_bytes: None,
            },
            new_item_size: Some(1),
        };
        let victims = RandomStrategy.select_for_eviction(&*p, &ctx).await.unwrap();
        assert_eq!(victims.len(), 2);
        for v in &victims {
            assert!(p.get_metadata(v).await.unwrap().is_some());
        }
        // without replacement
        assert_ne!(victims[0], victims[1]);
    }

    #[tokio::test]
    async fn test_no_pressure_no_victims() {
        let p = provider();
        seed(&p, "a", meta(1, 100, 100, 0, 1)).await;
        let ctx = EvictionContext {
            current: CacheSize {
                item_count: 1,
                size_bytes: 0,
            },
            limits: SizeLimits::default(),
            new_item_size: Some(1),
        };
        assert!(
            RandomStrategy
                .select_for_eviction(&*p, &ctx)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
