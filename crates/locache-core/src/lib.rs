//! locache-core: Core types for the locache library
//!
//! This crate provides the key model, normalization, item and query
//! contracts, usage metadata, TTL validation, statistics, events and
//! configuration shared by the locache workspace.

mod api;
mod coordinate;
mod error;
mod events;
mod item;
mod key;
mod metadata;
mod options;
mod query;
mod size_parse;
mod stats;
mod ttl;

pub use api::{ApiOptions, ItemApi};
pub use coordinate::Coordinate;
pub use error::{CacheError, Result};
pub use events::{CacheEvent, CacheEventKind, EventEmitter, EventSource, SubscriptionId};
pub use item::{Item, ItemEvent, RefAggregate, estimated_size};
pub use key::{
    ComKey, ItemKey, KeyId, LocKey, MAX_LOCATION_DEPTH, PriKey, fnv1a_32, key_hash, loc_equals,
    mix32, normalize, normalize_loc, verification_hash,
};
pub use metadata::{CacheSize, ItemMetadata, SizeLimits, now_millis};
pub use options::{
    ArcConfig, CacheConfig, CacheConfigBuilder, CacheType, DecayConfig, EvictionConfig,
    IndexedConfig, KvConfig, LfuConfig, MemoryConfig, SizeLimitConfig, SketchConfig,
    TwoQueueConfig,
};
pub use query::{ItemQuery, QueryResultEntry, finder_hash, query_hash};
pub use size_parse::parse_size;
pub use stats::{CacheStats, StatsManager};
pub use ttl::{TtlConfig, TtlManager};
