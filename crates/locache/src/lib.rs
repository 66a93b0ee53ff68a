//! locache: Hierarchical, location-aware client-side cache
//!
//! # Features
//!
//! - **Location-aware keys** (primary and composite, normalized)
//! - **Pluggable storage** (memory, enhanced memory, string-KV, indexed)
//! - **Pluggable eviction** (FIFO, LRU, MRU, LFU with count-min sketch,
//!   Random, 2Q, ARC)
//! - **TTL and query-result memoization**
//! - **In-flight request coalescing**
//! - **Aggregation of referenced entities through sibling caches**
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use locache::prelude::*;
//!
//! let config = CacheConfig::builder()
//!     .ttl(std::time::Duration::from_secs(60))
//!     .eviction(EvictionConfig::Lru)
//!     .build()?;
//! let cache = Cache::new(api, Coordinate::primary("user")?, config)?;
//!
//! if let Some(user) = cache.get(&ItemKey::primary("user", 1)).await? {
//!     println!("{user:?}");
//! }
//! ```

mod aggregator;
mod cache;
mod coalescer;

// Re-export core
pub use locache_core::*;

// Re-export storage
pub use locache_storage::{
    CacheInfo, CacheMap, CacheMapFactory, DocumentStore, EnhancedMemoryCacheMap, FileDocumentStore,
    FileKvStore, IndexedCacheMap, KvCacheMap, KvFlavor, KvStore, MemoryCacheMap,
    MemoryDocumentStore, MemoryKvStore, MetadataProvider, create_cache_map,
};

// Re-export eviction
pub use locache_evict::{
    ArcStrategy, CountMinSketch, EvictionContext, EvictionManager, EvictionStrategy, FifoStrategy,
    LfuStrategy, LruStrategy, MruStrategy, RandomStrategy, TwoQueueStrategy, strategy_from_config,
};

pub use aggregator::{AggregateSpec, Aggregator, SiblingCache};
pub use cache::{Cache, Retrieval, RetrievalSource};
pub use coalescer::Coalescer;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Aggregator, Cache, CacheConfig, CacheError, CacheEvent, CacheEventKind, CacheStats,
        CacheType, Coordinate, EvictionConfig, Item, ItemApi, ItemKey, ItemQuery, KeyId, LocKey,
        Result, Retrieval, RetrievalSource,
    };
}

#[cfg(test)]
mod tests;
