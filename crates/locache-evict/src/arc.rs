//! Adaptive replacement: recency/frequency partitions with ghost feedback

use async_trait::async_trait;
use locache_core::{ArcConfig, ItemMetadata, Result, now_millis};
use locache_storage::MetadataProvider;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::{EvictionContext, EvictionStrategy, take_victims};

// partition scoring weights: the recent side leans on recency, the
// frequent side balances recency and frequency
const RECENT_WEIGHTS: (f64, f64) = (0.7, 0.3);
const FREQUENT_WEIGHTS: (f64, f64) = (0.5, 0.5);

#[derive(Default)]
struct ArcState {
    recent_ghosts: VecDeque<String>,
    frequent_ghosts: VecDeque<String>,
    /// adaptive share of the cache granted to the recent partition
    target_recent: f64,
}

fn remove_from(queue: &mut VecDeque<String>, hash: &str) -> bool {
    if let Some(pos) = queue.iter().position(|h| h == hash) {
        queue.remove(pos);
        true
    } else {
        false
    }
}

/// ARC partitions live items into *recent* (at or below the access-count
/// threshold) and *frequent*. Two capped ghost lists remember evictions;
/// a ghost hit at re-add time moves the adaptive target toward the
/// partition that lost the item. Ghost entries influence the target only
/// at the moment of consumption and are removed once consumed.
pub struct ArcStrategy {
    config: ArcConfig,
    state: Mutex<ArcState>,
}

impl ArcStrategy {
    pub fn new(config: ArcConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ArcState::default()),
        }
    }

    fn is_recent(&self, meta: &ItemMetadata) -> bool {
        meta.access_count <= self.config.frequent_threshold
    }

    /// Current adaptive target, for inspection in tests
    pub fn target_recent(&self) -> f64 {
        self.state.lock().target_recent
    }

    /// Order one partition, coldest first
    fn order_partition(
        &self,
        mut entries: Vec<(String, ItemMetadata)>,
        weights: (f64, f64),
    ) -> Vec<(String, usize)> {
        if self.config.frequency_weighted {
            let now = now_millis();
            let max_age = entries
                .iter()
                .map(|(_, m)| now.saturating_sub(m.last_accessed_at))
                .max()
                .unwrap_or(1)
                .max(1) as f64;
            let (w_recency, w_frequency) = weights;
            let staleness = |m: &ItemMetadata| {
                let age = now.saturating_sub(m.last_accessed_at) as f64 / max_age;
                let coldness = 1.0 / (1.0 + m.access_count as f64);
                w_recency * age + w_frequency * coldness
            };
            entries.sort_by(|(ha, a), (hb, b)| {
                staleness(b)
                    .partial_cmp(&staleness(a))
                    .unwrap_or(Ordering::Equal)
                    .then(a.last_accessed_at.cmp(&b.last_accessed_at))
                    .then(ha.cmp(hb))
            });
        } else {
            entries.sort_by(|(ha, a), (hb, b)| {
                a.last_accessed_at
                    .cmp(&b.last_accessed_at)
                    .then(ha.cmp(hb))
            });
        }
        entries
            .into_iter()
            .map(|(hash, meta)| (hash, meta.estimated_size))
            .collect()
    }
}

#[async_trait]
impl EvictionStrategy for ArcStrategy {
    fn name(&self) -> &'static str {
        "arc"
    }

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>> {
        let all = provider.all_metadata().await?;
        let mut recent = Vec::new();
        let mut frequent = Vec::new();
        for (hash, meta) in all {
            if self.is_recent(&meta) {
                recent.push((hash, meta));
            } else {
                frequent.push((hash, meta));
            }
        }

        let target = self.state.lock().target_recent;
        let recent_first = recent.len() as f64 > target || frequent.is_empty();

        let primary;
        let secondary;
        if recent_first {
            primary = self.order_partition(recent, RECENT_WEIGHTS);
            secondary = self.order_partition(frequent, FREQUENT_WEIGHTS);
        } else {
            primary = self.order_partition(frequent, FREQUENT_WEIGHTS);
            secondary = self.order_partition(recent, RECENT_WEIGHTS);
        }

        let mut ordered = primary;
        ordered.extend(secondary);
        Ok(take_victims(ordered, ctx))
    }

    async fn on_item_added(
        &self,
        hash: &str,
        _estimated_size: usize,
        _provider: &dyn MetadataProvider,
    ) -> Result<()> {
        let max = self.config.max_ghost_size as f64;
        let rate = self.config.learning_rate;
        let mut state = self.state.lock();
        if remove_from(&mut state.recent_ghosts, hash) {
            // the recent side was starved: grant it more room
            state.target_recent = (state.target_recent + rate).min(max);
        } else if remove_from(&mut state.frequent_ghosts, hash) {
            state.target_recent = (state.target_recent - rate).max(0.0);
        }
        Ok(())
    }

    async fn on_item_accessed(&self, _hash: &str, _provider: &dyn MetadataProvider) -> Result<()> {
        Ok(())
    }

    async fn on_item_removed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()> {
        let partition_recent = provider
            .get_metadata(hash)
            .await?
            .map(|m| self.is_recent(&m))
            .unwrap_or(true);
        {
            let mut state = self.state.lock();
            let ghosts = if partition_recent {
                &mut state.recent_ghosts
            } else {
                &mut state.frequent_ghosts
            };
            if !ghosts.contains(&hash.to_string()) {
                ghosts.push_back(hash.to_string());
            }
            let cap = self.config.max_ghost_size;
            while state.recent_ghosts.len() > cap {
                state.recent_ghosts.pop_front();
            }
            while state.frequent_ghosts.len() > cap {
                state.frequent_ghosts.pop_front();
            }
        }
        provider.delete_metadata(hash).await
    }
}
