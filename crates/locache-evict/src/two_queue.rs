//! 2Q eviction: a probationary recent queue in front of a hot queue

use async_trait::async_trait;
use locache_core::{ItemMetadata, Result, TwoQueueConfig, now_millis};
use locache_storage::MetadataProvider;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::{EvictionContext, EvictionStrategy, take_victims};

#[derive(Default)]
struct TwoQueueState {
    /// T1: first-touch entries in arrival order
    recent: VecDeque<String>,
    /// T2: promoted entries in access order (back = most recent)
    frequent: VecDeque<String>,
    /// keys recently evicted; a re-add goes straight to T2
    ghost: VecDeque<String>,
    last_decay_at: u64,
}

fn remove_from(queue: &mut VecDeque<String>, hash: &str) -> bool {
    if let Some(pos) = queue.iter().position(|h| h == hash) {
        queue.remove(pos);
        true
    } else {
        false
    }
}

/// TwoQueue: first touch lands in the recent queue; a second touch within
/// the promotion threshold moves the entry to the frequent queue; a ghost
/// hit on re-add skips probation entirely. Eviction drains the recent
/// queue first unless it is within its target share, then takes from the
/// frequent queue by LRU or by a frequency-weighted score.
pub struct TwoQueueStrategy {
    config: TwoQueueConfig,
    state: Mutex<TwoQueueState>,
}

impl TwoQueueStrategy {
    pub fn new(config: TwoQueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TwoQueueState {
                last_decay_at: now_millis(),
                ..Default::default()
            }),
        }
    }

    fn target_recent_len(&self, ctx: &EvictionContext) -> usize {
        let bound = ctx
            .limits
            .max_items
            .unwrap_or(ctx.current.item_count.max(1));
        ((bound as f64 * self.config.recent_ratio).ceil() as usize).max(1)
    }

    fn hot_score(&self, meta: &ItemMetadata) -> f64 {
        meta.frequency_score.unwrap_or(meta.access_count as f64)
    }

    /// Periodic decay of hot-queue scores, when configured
    async fn maybe_decay_hot(&self, provider: &dyn MetadataProvider) -> Result<()> {
        let Some(decay) = &self.config.hot_decay else {
            return Ok(());
        };
        let now = now_millis();
        let hot: Vec<String> = {
            let mut state = self.state.lock();
            if now.saturating_sub(state.last_decay_at) < decay.interval.as_millis() as u64 {
                return Ok(());
            }
            state.last_decay_at = now;
            state.frequent.iter().cloned().collect()
        };
        for hash in hot {
            if let Some(mut meta) = provider.get_metadata(&hash).await? {
                let previous = meta.frequency_score.unwrap_or(meta.access_count as f64);
                meta.frequency_score =
                    Some((previous * (1.0 - decay.factor)).max(decay.min_threshold));
                provider.set_metadata(&hash, meta).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EvictionStrategy for TwoQueueStrategy {
    fn name(&self) -> &'static str {
        "2q"
    }

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>> {
        self.maybe_decay_hot(provider).await?;
        let all = provider.all_metadata().await?;

        let target_recent = self.target_recent_len(ctx);
        let (mut sim_recent, mut sim_frequent) = {
            let mut state = self.state.lock();
            // drop bookkeeping for keys the provider no longer knows
            state.recent.retain(|h| all.contains_key(h));
            state.frequent.retain(|h| all.contains_key(h));
            (state.recent.clone(), state.frequent.clone())
        };

        // keys the queues have not seen yet are treated as probationary
        for hash in all.keys() {
            if !sim_recent.contains(hash) && !sim_frequent.contains(hash) {
                sim_recent.push_back(hash.clone());
            }
        }

        if self.config.frequency_weighted {
            let mut hot: Vec<String> = sim_frequent.into_iter().collect();
            hot.sort_by(|a, b| {
                let sa = all.get(a).map(|m| self.hot_score(m)).unwrap_or(0.0);
                let sb = all.get(b).map(|m| self.hot_score(m)).unwrap_or(0.0);
                sa.partial_cmp(&sb).unwrap_or(Ordering::Equal).then(a.cmp(b))
            });
            sim_frequent = hot.into();
        }

        let mut ordered = Vec::with_capacity(all.len());
        while !sim_recent.is_empty() || !sim_frequent.is_empty() {
            let from_recent =
                !sim_recent.is_empty() && (sim_recent.len() > target_recent || sim_frequent.is_empty());
            let hash = if from_recent {
                sim_recent.pop_front()
            } else {
                sim_frequent.pop_front()
            };
            if let Some(hash) = hash {
                let size = all.get(&hash).map(|m| m.estimated_size).unwrap_or(0);
                ordered.push((hash, size));
            }
        }

        Ok(take_victims(ordered, ctx))
    }

    async fn on_item_added(
        &self,
        hash: &str,
        _estimated_size: usize,
        _provider: &dyn MetadataProvider,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if remove_from(&mut state.ghost, hash) {
            // ghost hit: the key earned the hot queue before it was evicted
            state.frequent.push_back(hash.to_string());
        } else if !state.recent.contains(&hash.to_string())
            && !state.frequent.contains(&hash.to_string())
        {
            state.recent.push_back(hash.to_string());
        }
        Ok(())
    }

    async fn on_item_accessed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()> {
        let meta = provider.get_metadata(hash).await?;
        let mut state = self.state.lock();
        let owned = hash.to_string();

        if state.frequent.contains(&owned) {
            remove_from(&mut state.frequent, hash);
            state.frequent.push_back(owned);
        } else if state.recent.contains(&owned) {
            let touches = meta.map(|m| m.access_count + 1).unwrap_or(1);
            if touches >= self.config.promotion_threshold {
                remove_from(&mut state.recent, hash);
                state.frequent.push_back(owned);
            }
        } else {
            state.recent.push_back(owned);
        }
        Ok(())
    }

    async fn on_item_removed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()> {
        {
            let mut state = self.state.lock();
            remove_from(&mut state.recent, hash);
            remove_from(&mut state.frequent, hash);
            state.ghost.push_back(hash.to_string());
            while state.ghost.len() > self.config.max_ghost_size {
                state.ghost.pop_front();
            }
        }
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

    async fn add(strategy: &TwoQueueStrategy, p: &std::sync::Arc<dyn MetadataProvider>, hash: &str, pk: i64) {
        seed(p, hash, meta(pk, 100, 100, 0, 1)).await;
        strategy.on_item_added(hash, 1, &**p).await.unwrap();
    }

    #[tokio::test]
    async fn test_promoted_entry_outlives_probationary_ones() {
        let p = provider();
        let strategy = TwoQueueStrategy::new(TwoQueueConfig::default());

        // add(X); add(Y); access(Y); add(Z); add(W); adding V forces eviction
        add(&strategy, &p, "x", 1).await;
        add(&strategy, &p, "y", 2).await;
        // the access is the second touch, which promotes to the hot queue
        let mut m = p.get_metadata("y").await.unwrap().unwrap();
        m.touch();
        p.set_metadata("y", m).await.unwrap();
        strategy.on_item_accessed("y", &*p).await.unwrap();
        add(&strategy, &p, "z", 3).await;
        add(&strategy, &p, "w", 4).await;

        let victims = strategy
            .select_for_eviction(&*p, &pressure(4, 4))
            .await
            .unwrap();
        // X is evicted before Y: Y sits in the hot queue
        assert_eq!(victims, vec!["x"]);
    }

    #[tokio::test]
    async fn test_ghost_hit_readds_straight_to_hot_queue() {
        let p = provider();
        let strategy = TwoQueueStrategy::new(TwoQueueConfig::default());

        add(&strategy, &p, "a", 1).await;
        strategy.on_item_removed("a", &*p).await.unwrap();

        // re-add after eviction: lands in T2 directly
        add(&strategy, &p, "a", 1).await;
        add(&strategy, &p, "b", 2).await;
        add(&strategy, &p, "c", 3).await;

        let victims = strategy
            .select_for_eviction(&*p, &pressure(3, 3))
            .await
            .unwrap();
        assert_eq!(victims, vec!["b"]);
    }

    #[tokio::test]
    async fn test_ghost_queue_is_capped() {
        let p = provider();
        let strategy = TwoQueueStrategy::new(TwoQueueConfig {
            max_ghost_size: 2,
            ..Default::default()
        });

        for (i, hash) in ["a", "b", "c"].iter().enumerate() {
            add(&strategy, &p, hash, i as i64).await;
            strategy.on_item_removed(hash, &*p).await.unwrap();
        }

        // "a" fell off the ghost queue; re-adding it is a fresh first touch
        add(&strategy, &p, "a", 1).await;
        add(&strategy, &p, "d", 4).await;
        let victims = strategy
            .select_for_eviction(&*p, &pressure(2, 2))
            .await
            .unwrap();
        assert_eq!(victims, vec!["a"]);
    }

    #[tokio::test]
    async fn test_eviction_prefers_recent_queue_until_target() {
        let p = provider();
        let strategy = TwoQueueStrategy::new(TwoQueueConfig {
            recent_ratio: 0.5,
            ..Default::default()
        });

        // two promoted, two probationary, bound of 4
        for (i, hash) in ["h1", "h2"].iter().enumerate() {
            add(&strategy, &p, hash, i as i64).await;
            let mut m = p.get_metadata(hash).await.unwrap().unwrap();
            m.touch();
            p.set_metadata(hash, m).await.unwrap();
            strategy.on_item_accessed(hash, &*p).await.unwrap();
        }
        add(&strategy, &p, "r1", 10).await;
        add(&strategy, &p, "r2", 11).await;

        // the recent queue is within its target share, so the deficit of
        // two comes out of the hot queue in LRU order
        let victims = strategy
            .select_for_eviction(&*p, &pressure(4, 3))
            .await
            .unwrap();
        assert_eq!(victims, vec!["h1", "h2"]);
    }
}
