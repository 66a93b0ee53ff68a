//! Least-frequently-used eviction with optional sketching and decay

use async_trait::async_trait;
use locache_core::{DecayConfig, ItemMetadata, LfuConfig, Result, now_millis};
use locache_storage::MetadataProvider;
use parking_lot::Mutex;
use std::cmp::Ordering;

use crate::sketch::CountMinSketch;
use crate::{EvictionContext, EvictionStrategy, take_victims};

struct LfuState {
    sketch: Option<CountMinSketch>,
    last_decay_at: u64,
}

/// LFU in one of three modes:
///
/// - *simple* (default): score is the raw access count;
/// - *sketched*: frequencies come from a count-min sketch instead of
///   per-item counters;
/// - *decayed*: scores age toward recency on every access, with a periodic
///   bulk decay during selection, mirrored into the sketch when present.
///
/// Ties break toward the older last access, then by key string.
pub struct LfuStrategy {
    config: LfuConfig,
    state: Mutex<LfuState>,
}

impl LfuStrategy {
    pub fn new(config: LfuConfig) -> Self {
        let sketch = config
            .sketch
            .as_ref()
            .map(|s| CountMinSketch::new(s.width, s.depth));
        Self {
            config,
            state: Mutex::new(LfuState {
                sketch,
                last_decay_at: now_millis(),
            }),
        }
    }

    fn access_score(decay: &DecayConfig, previous: f64, elapsed_ms: u64) -> f64 {
        let interval = decay.interval.as_millis() as f64;
        let retained = (1.0 - elapsed_ms as f64 * decay.factor / interval).max(0.0);
        (previous * retained + 1.0).max(decay.min_threshold)
    }

    /// Run the periodic bulk decay if the interval elapsed; returns whether
    /// metadata scores must be rewritten.
    fn tick_bulk_decay(&self) -> bool {
        let Some(decay) = &self.config.decay else {
            return false;
        };
        let now = now_millis();
        let mut state = self.state.lock();
        if now.saturating_sub(state.last_decay_at) < decay.interval.as_millis() as u64 {
            return false;
        }
        state.last_decay_at = now;
        if let Some(sketch) = &mut state.sketch {
            sketch.decay(1.0 - decay.factor);
        }
        true
    }

    fn score(&self, hash: &str, meta: &ItemMetadata) -> f64 {
        if self.config.decay.is_some() {
            return meta
                .frequency_score
                .unwrap_or(meta.access_count as f64);
        }
        if self.config.sketch.is_some() {
            let state = self.state.lock();
            if let Some(sketch) = &state.sketch {
                return sketch.estimate(hash) as f64;
            }
        }
        meta.access_count as f64
    }
}

#[async_trait]
impl EvictionStrategy for LfuStrategy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    async fn select_for_eviction(
        &self,
        provider: &dyn MetadataProvider,
        ctx: &EvictionContext,
    ) -> Result<Vec<String>> {
        if self.tick_bulk_decay() {
            if let Some(decay) = &self.config.decay {
                let now = now_millis();
                for (hash, mut meta) in provider.all_metadata().await? {
                    if let Some(previous) = meta.frequency_score {
                        meta.frequency_score =
                            Some((previous * (1.0 - decay.factor)).max(decay.min_threshold));
                        meta.last_frequency_update = Some(now);
                        provider.set_metadata(&hash, meta).await?;
                    }
                }
            }
        }

        let mut entries: Vec<(String, ItemMetadata, f64)> = provider
            .all_metadata()
            .await?
            .into_iter()
            .map(|(hash, meta)| {
                let score = self.score(&hash, &meta);
                (hash, meta, score)
            })
            .collect();
        entries.sort_by(|(ha, a, sa), (hb, b, sb)| {
            sa.partial_cmp(sb)
                .unwrap_or(Ordering::Equal)
                .then(a.last_accessed_at.cmp(&b.last_accessed_at))
                .then(ha.cmp(hb))
        });
        let ordered = entries
            .into_iter()
            .map(|(hash, meta, _)| (hash, meta.estimated_size))
            .collect();
        Ok(take_victims(ordered, ctx))
    }

    async fn on_item_added(
        &self,
        hash: &str,
        _estimated_size: usize,
        provider: &dyn MetadataProvider,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(sketch) = &mut state.sketch {
                sketch.increment(hash);
            }
        }
        if let Some(mut meta) = provider.get_metadata(hash).await? {
            meta.raw_frequency = Some(1);
            if self.config.decay.is_some() {
                meta.frequency_score = Some(1.0);
                meta.last_frequency_update = Some(now_millis());
            }
            provider.set_metadata(hash, meta).await?;
        }
        Ok(())
    }

    async fn on_item_accessed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(sketch) = &mut state.sketch {
                sketch.increment(hash);
            }
        }
        if let Some(mut meta) = provider.get_metadata(hash).await? {
            meta.raw_frequency = Some(meta.raw_frequency.unwrap_or(0) + 1);
            if let Some(decay) = &self.config.decay {
                let now = now_millis();
                let elapsed = now.saturating_sub(meta.last_frequency_update.unwrap_or(now));
                let previous = meta.frequency_score.unwrap_or(0.0);
                meta.frequency_score = Some(Self::access_score(decay, previous, elapsed));
                meta.last_frequency_update = Some(now);
            }
            provider.set_metadata(hash, meta).await?;
        }
        Ok(())
    }

    async fn on_item_removed(&self, hash: &str, provider: &dyn MetadataProvider) -> Result<()> {
        provider.delete_metadata(hash).await
    }
}
