//! locache-evict: Pluggable eviction policies over the metadata view
//!
//! Strategies decide which keys to drop under pressure; they operate only
//! on per-item usage metadata, never on the stored items themselves. The
//! [`EvictionManager`] is the only component that applies their decisions.

mod arc;
mod fifo;
mod lfu;
mod lru;
mod manager;
mod mru;
mod random;
mod sketch;
mod two_queue;

#[cfg(test)]
mod test_util;

pub use arc::ArcStrategy;
pub use fifo::FifoStrategy;
pub use lfu::LfuStrategy;
pub use lru::LruStrategy;
pub use manager::EvictionManager;
pub use mru::MruStrategy;
pub use random::RandomStrategy;
pub use sketch::CountMinSketch;
pub use two_queue::TwoQueueStrategy;

use async_trait::async_trait;
use locache_core::{CacheSize, EvictionConfig, Result, SizeLimits};
use locache_storage::MetadataProvider;

/// Pressure context a strategy selects against
#[derive(Debug, Clone, Copy)]
pub struct EvictionContext {
    /// Occupancy before the incoming item is stored
    pub current: CacheSize,
    pub limits: SizeLimits,
    /// Estimated size of the incoming item, when selection runs for an insert
    pub new_item_size: Option<usize>,
}

impl EvictionContext {
    /// Whether any configured bound is (or would be) exceeded
    pub fn over_limit(&self) -> bool {
        self.limits.exceeded_by(&self.current, self.new_item_size)
    }

    /// Items that must go to satisfy the item bound
    fn item_deficit(&self) -> usize {
        match self.limits.max_items {
            None => 0,
            Some(max) => {
                let projected = self.current.item_count + usize::from(self.new_item_size.is_some());
                projected.saturating_sub(max)
            }
        }
    }

    /// Bytes that must be freed to satisfy the byte bound
    fn byte_deficit(&self) -> usize {
        match self.limits.max_size_bytes {
            None => 0,
            Some(max) => {
                let projected = self.current.size_bytes + self.new_item_size.unwrap_or(0);
                projected.saturating_sub(max)
            }
        }
    }
}

/// An eviction policy.
///
/// `select_for_eviction` returns keys in eviction order and returns an
/// empty list when no limit is exceeded; it never returns a key absent
/// from the provider. Implementations keep their own bookkeeping behind
/// interior mutability so the shared cache context can call them through
/// `&self`.
#[async_trait]
pub trait EvictionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>>;

    /// A new item (or a replacement) was stored under `hash`
    async fn on_item_added(
        &self,
        hash: &str,
        estimated_size: usize,
        provider: &dyn MetadataProvider,
    ) -> Result<()>;

    /// The item under `hash` was read
    async fn on_item_accessed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()>;

    /// The item under `hash` left the cache (delete or eviction)
    async fn on_item_removed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()>;
}

/// Build the strategy selected by an [`EvictionConfig`]
pub fn strategy_from_config(config: &EvictionConfig) -> Box<dyn EvictionStrategy> {
    match config {
        EvictionConfig::Fifo => Box::new(FifoStrategy),
        EvictionConfig::Lru => Box::new(LruStrategy),
        EvictionConfig::Mru => Box::new(MruStrategy),
        EvictionConfig::Random => Box::new(RandomStrategy),
        EvictionConfig::Lfu(cfg) => Box::new(LfuStrategy::new(cfg.clone())),
        EvictionConfig::TwoQueue(cfg) => Box::new(TwoQueueStrategy::new(cfg.clone())),
        EvictionConfig::Arc(cfg) => Box::new(ArcStrategy::new(cfg.clone())),
    }
}

/// Walk candidates in eviction order until both deficits are satisfied.
///
/// Candidates are `(hash, estimated_size)`. The result is clamped to the
/// candidate count; when the incoming item alone cannot fit, everything
/// selectable is returned.
pub(crate) fn take_victims(
    ordered: Vec<(String, usize)>,
    ctx: &EvictionContext,
) -> Vec<String> {
    let item_deficit = ctx.item_deficit();
    let byte_deficit = ctx.byte_deficit();
    if item_deficit == 0 && byte_deficit == 0 {
        return Vec::new();
    }

    let mut victims = Vec::new();
    let mut freed = 0usize;
    for (hash, size) in ordered {
        if victims.len() >= item_deficit && freed >= byte_deficit {
            break;
        }
        freed += size;
        victims.push(hash);
    }
    victims
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(
        item_count: usize,
        size_bytes: usize,
        max_items: Option<usize>,
        max_size_bytes: Option<usize>,
        new_item_size: Option<usize>,
    ) -> EvictionContext {
        EvictionContext {
            current: CacheSize {
                item_count,
                size_bytes,
            },
            limits: SizeLimits {
                max_items,
                max_size_bytes,
            },
            new_item_size,
        }
    }

    fn candidates(n: usize, size: usize) -> Vec<(String, usize)> {
        (0..n).map(|i| (format!("k{i}"), size)).collect()
    }

    #[test]
    fn test_no_limit_exceeded_selects_nothing() {
        let ctx = ctx(2, 100, Some(3), None, Some(10));
        assert!(take_victims(candidates(2, 50), &ctx).is_empty());
        assert!(!ctx.over_limit());
    }

    #[test]
    fn test_item_bound_evicts_exactly_the_overflow() {
        // 3 items at the bound, one incoming: one must go
        let ctx = ctx(3, 0, Some(3), None, Some(10));
        assert_eq!(take_victims(candidates(3, 10), &ctx), vec!["k0"]);
    }

    #[test]
    fn test_byte_bound_frees_enough_room() {
        // 90 bytes stored, bound 100, incoming 35: free at least 25
        let ctx1 = ctx(3, 90, None, Some(100), Some(35));
        assert_eq!(take_victims(candidates(3, 30), &ctx1), vec!["k0"]);

        // incoming 95: free at least 85, i.e. three 30-byte victims
        let ctx2 = ctx(3, 90, None, Some(100), Some(95));
        assert_eq!(take_victims(candidates(3, 30), &ctx2).len(), 3);
    }

    #[test]
    fn test_selection_clamped_to_candidate_count() {
        // the incoming item alone cannot fit; everything is selectable
        let ctx = ctx(2, 20, None, Some(100), Some(500));
        assert_eq!(take_victims(candidates(2, 10), &ctx).len(), 2);
    }
}
