//! Most-recently-used eviction

use async_trait::async_trait;
use locache_core::{ItemMetadata, Result};
use locache_storage::MetadataProvider;

use crate::{EvictionContext, EvictionStrategy, take_victims};

/// Evicts the entry with the newest last access; useful when recently
/// touched items are the least likely to be touched again. Ties break by
/// key string.
pub struct MruStrategy;

#[async_trait]
impl EvictionStrategy for MruStrategy {
    fn name(&self) -> &'static str {
        "mru"
    }

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>> {
        let mut entries: Vec<(String, ItemMetadata)> =
            provider.all_metadata().await?.into_iter().collect();
        entries.sort_by(|(ha, a), (hb, b)| {
            b.last_accessed_at
                .cmp(&a.last_accessed_at)
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
