//! Cache configuration: recognised options, builder and validation

use crate::error::{CacheError, Result};
use crate::metadata::SizeLimits;
use crate::size_parse::parse_size;
use crate::ttl::TtlConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Which cache map implementation backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// Plain in-memory map
    #[default]
    Memory,
    /// In-memory map with size accounting and limits
    EnhancedMemory,
    /// Serialized entries in an ephemeral string-KV store
    Session,
    /// Serialized entries in a persistent string-KV store
    Local,
    /// Asynchronous indexed document store
    Indexed,
    /// Caller-supplied cache map factory
    Custom,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Memory => "memory",
            CacheType::EnhancedMemory => "enhancedMemory",
            CacheType::Session => "session",
            CacheType::Local => "local",
            CacheType::Indexed => "indexed",
            CacheType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for CacheType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(CacheType::Memory),
            "enhancedMemory" => Ok(CacheType::EnhancedMemory),
            "session" => Ok(CacheType::Session),
            "local" => Ok(CacheType::Local),
            "indexed" => Ok(CacheType::Indexed),
            "custom" => Ok(CacheType::Custom),
            other => Err(CacheError::ConfigInvalid(format!(
                "unknown cache type '{other}'"
            ))),
        }
    }
}

/// Size bounds, with the byte bound given as a human-readable string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizeLimitConfig {
    pub max_items: Option<usize>,
    pub max_size_bytes: Option<String>,
}

impl SizeLimitConfig {
    /// Resolve to numeric limits, parsing the size string
    pub fn resolve(&self) -> Result<SizeLimits> {
        Ok(SizeLimits {
            max_items: self.max_items,
            max_size_bytes: self
                .max_size_bytes
                .as_deref()
                .map(parse_size)
                .transpose()?,
        })
    }
}

/// Options for the in-memory backends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryConfig {
    /// Shorthand item bound; `size.max_items` wins when both are set
    pub max_items: Option<usize>,
    pub size: SizeLimitConfig,
}

impl MemoryConfig {
    pub fn resolve_limits(&self) -> Result<SizeLimits> {
        let mut limits = self.size.resolve()?;
        if limits.max_items.is_none() {
            limits.max_items = self.max_items;
        }
        Ok(limits)
    }
}

/// Options for the string-KV backends (session and local flavors)
#[derive(Debug, Clone, PartialEq)]
pub struct KvConfig {
    /// Namespace prefix for every stored key
    pub key_prefix: String,
    /// Compress stored values (zstd + base64)
    pub compress: bool,
    /// Backing file for the local flavor
    pub path: Option<PathBuf>,
    /// Byte quota enforced by the store itself
    pub quota_bytes: Option<usize>,
    pub size: SizeLimitConfig,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            key_prefix: "locache".to_string(),
            compress: false,
            path: None,
            quota_bytes: None,
            size: SizeLimitConfig::default(),
        }
    }
}

/// Options for the asynchronous indexed backend
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedConfig {
    pub db_name: String,
    /// Schema version recorded in every stored document
    pub version: u32,
    pub store_name: String,
    /// Root directory for the file-backed store; in-memory when absent
    pub path: Option<PathBuf>,
    pub size: SizeLimitConfig,
}

impl Default for IndexedConfig {
    fn default() -> Self {
        Self {
            db_name: "locache".to_string(),
            version: 1,
            store_name: "items".to_string(),
            path: None,
            size: SizeLimitConfig::default(),
        }
    }
}

/// Count-min sketch dimensions for sketched LFU
#[derive(Debug, Clone, PartialEq)]
pub struct SketchConfig {
    pub width: usize,
    pub depth: usize,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            depth: 4,
        }
    }
}

/// Frequency decay parameters shared by LFU and 2Q
#[derive(Debug, Clone, PartialEq)]
pub struct DecayConfig {
    /// Fraction of the score shed per full interval
    pub factor: f64,
    /// How often bulk decay runs
    pub interval: Duration,
    /// Scores never decay below this floor
    pub min_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            interval: Duration::from_secs(60),
            min_threshold: 0.1,
        }
    }
}

/// LFU policy options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LfuConfig {
    /// Estimate frequencies with a count-min sketch instead of raw counts
    pub sketch: Option<SketchConfig>,
    /// Age scores toward recency
    pub decay: Option<DecayConfig>,
}

/// 2Q policy options
#[derive(Debug, Clone, PartialEq)]
pub struct TwoQueueConfig {
    /// Fraction of the item bound reserved for the recent queue
    pub recent_ratio: f64,
    /// Access count at which an entry is promoted to the hot queue
    pub promotion_threshold: u64,
    pub max_ghost_size: usize,
    /// Score the hot queue by frequency instead of pure LRU
    pub frequency_weighted: bool,
    /// Decay applied to hot-queue scores
    pub hot_decay: Option<DecayConfig>,
}

impl Default for TwoQueueConfig {
    fn default() -> Self {
        Self {
            recent_ratio: 0.25,
            promotion_threshold: 2,
            max_ghost_size: 128,
            frequency_weighted: false,
            hot_decay: None,
        }
    }
}

/// ARC policy options
#[derive(Debug, Clone, PartialEq)]
pub struct ArcConfig {
    pub max_ghost_size: usize,
    /// How far one ghost hit moves the adaptive target
    pub learning_rate: f64,
    /// Access count at or below which an entry counts as "recent"
    pub frequent_threshold: u64,
    /// Score partitions by a recency/frequency blend instead of pure LRU
    pub frequency_weighted: bool,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            max_ghost_size: 128,
            learning_rate: 1.0,
            frequent_threshold: 1,
            frequency_weighted: false,
        }
    }
}

/// Eviction policy selection with policy-specific options
#[derive(Debug, Clone, PartialEq)]
pub enum EvictionConfig {
    Fifo,
    Lru,
    Mru,
    Random,
    Lfu(LfuConfig),
    TwoQueue(TwoQueueConfig),
    Arc(ArcConfig),
}

impl EvictionConfig {
    pub fn policy_name(&self) -> &'static str {
        match self {
            EvictionConfig::Fifo => "fifo",
            EvictionConfig::Lru => "lru",
            EvictionConfig::Mru => "mru",
            EvictionConfig::Random => "random",
            EvictionConfig::Lfu(_) => "lfu",
            EvictionConfig::TwoQueue(_) => "2q",
            EvictionConfig::Arc(_) => "arc",
        }
    }

    fn validate(&self) -> Result<()> {
        fn check_decay(decay: &DecayConfig) -> Result<()> {
            if !(decay.factor > 0.0 && decay.factor <= 1.0) {
                return Err(CacheError::ConfigInvalid(
                    "decay factor must be in (0, 1]".to_string(),
                ));
            }
            if decay.interval.is_zero() {
                return Err(CacheError::ConfigInvalid(
                    "decay interval must be positive".to_string(),
                ));
            }
            if decay.min_threshold < 0.0 {
                return Err(CacheError::ConfigInvalid(
                    "decay min threshold must be non-negative".to_string(),
                ));
            }
            Ok(())
        }

        match self {
            EvictionConfig::Lfu(cfg) => {
                if let Some(sketch) = &cfg.sketch {
                    if sketch.width == 0 || sketch.depth == 0 {
                        return Err(CacheError::ConfigInvalid(
                            "sketch width and depth must be positive".to_string(),
                        ));
                    }
                }
                if let Some(decay) = &cfg.decay {
                    check_decay(decay)?;
                }
            }
            EvictionConfig::TwoQueue(cfg) => {
                if !(0.0..=1.0).contains(&cfg.recent_ratio) {
                    return Err(CacheError::ConfigInvalid(
                        "2q recent ratio must be in [0, 1]".to_string(),
                    ));
                }
                if cfg.promotion_threshold == 0 {
                    return Err(CacheError::ConfigInvalid(
                        "2q promotion threshold must be positive".to_string(),
                    ));
                }
                if cfg.max_ghost_size == 0 {
                    return Err(CacheError::ConfigInvalid(
                        "2q ghost size must be positive".to_string(),
                    ));
                }
                if let Some(decay) = &cfg.hot_decay {
                    check_decay(decay)?;
                }
            }
            EvictionConfig::Arc(cfg) => {
                if cfg.max_ghost_size == 0 {
                    return Err(CacheError::ConfigInvalid(
                        "arc ghost size must be positive".to_string(),
                    ));
                }
                if cfg.learning_rate <= 0.0 {
                    return Err(CacheError::ConfigInvalid(
                        "arc learning rate must be positive".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Full cache configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub cache_type: CacheType,
    /// Default item TTL; zero or absent disables TTL
    pub ttl: Option<Duration>,
    /// TTL applied to memoized query results
    pub query_ttl: Option<Duration>,
    /// Per key-type TTL overrides
    pub per_type_ttl: HashMap<String, Duration>,
    /// All reads go to the API; writes still update the store
    pub bypass_cache: bool,
    /// Retry bounds handed to the API adapter
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub memory: MemoryConfig,
    pub kv: KvConfig,
    pub indexed: IndexedConfig,
    pub eviction: Option<EvictionConfig>,
    pub enable_debug_logging: bool,
    pub auto_sync: bool,
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// TTL configuration view for the TTL manager
    pub fn ttl_config(&self) -> TtlConfig {
        TtlConfig {
            default_ttl: self.ttl,
            per_type_ttl: self.per_type_ttl.clone(),
            query_ttl: self.query_ttl,
        }
    }

    /// Reject structurally invalid option combinations
    pub fn validate(&self) -> Result<()> {
        self.memory.resolve_limits()?;
        self.kv.size.resolve()?;
        self.indexed.size.resolve()?;

        if self.kv.key_prefix.is_empty() {
            return Err(CacheError::ConfigInvalid(
                "kv key prefix must not be empty".to_string(),
            ));
        }
        if self.cache_type == CacheType::Local && self.kv.path.is_none() {
            return Err(CacheError::ConfigInvalid(
                "local cache type requires kv.path".to_string(),
            ));
        }
        if self.indexed.db_name.is_empty() || self.indexed.store_name.is_empty() {
            return Err(CacheError::ConfigInvalid(
                "indexed db and store names must not be empty".to_string(),
            ));
        }
        if self.indexed.version == 0 {
            return Err(CacheError::ConfigInvalid(
                "indexed schema version must be positive".to_string(),
            ));
        }
        if let Some(eviction) = &self.eviction {
            eviction.validate()?;
        }
        Ok(())
    }
}

/// Fluent builder for `CacheConfig`
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder(CacheConfig);

impl CacheConfigBuilder {
    pub fn cache_type(mut self, cache_type: CacheType) -> Self {
        self.0.cache_type = cache_type;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.0.ttl = Some(ttl);
        self
    }

    pub fn query_ttl(mut self, ttl: Duration) -> Self {
        self.0.query_ttl = Some(ttl);
        self
    }

    pub fn per_type_ttl(mut self, kt: impl Into<String>, ttl: Duration) -> Self {
        self.0.per_type_ttl.insert(kt.into(), ttl);
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.0.bypass_cache = bypass;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.0.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.0.retry_delay = delay;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.0.memory.max_items = Some(max_items);
        self
    }

    pub fn max_size(mut self, size: impl Into<String>) -> Self {
        self.0.memory.size.max_size_bytes = Some(size.into());
        self
    }

    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.0.memory = memory;
        self
    }

    pub fn kv(mut self, kv: KvConfig) -> Self {
        self.0.kv = kv;
        self
    }

    pub fn indexed(mut self, indexed: IndexedConfig) -> Self {
        self.0.indexed = indexed;
        self
    }

    pub fn eviction(mut self, eviction: EvictionConfig) -> Self {
        self.0.eviction = Some(eviction);
        self
    }

    pub fn enable_debug_logging(mut self, enabled: bool) -> Self {
        self.0.enable_debug_logging = enabled;
        self
    }

    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.0.auto_sync = enabled;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<CacheConfig> {
        self.0.validate()?;
        Ok(self.0)
    }
}
