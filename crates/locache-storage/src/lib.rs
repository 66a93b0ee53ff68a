//! locache-storage: Cache map contract and storage backends
//!
//! Backends: plain and enhanced in-memory maps, serialized maps over
//! synchronous string-KV stores (ephemeral and file-backed), and an
//! asynchronous indexed document-store map.

mod cache_map;
mod factory;
mod indexed;
mod kv;
mod memory;

pub use cache_map::{CacheInfo, CacheMap, MetadataProvider};
pub use factory::{CacheMapFactory, create_cache_map};
pub use indexed::{DocumentStore, FileDocumentStore, IndexedCacheMap, MemoryDocumentStore};
pub use kv::{FileKvStore, KvCacheMap, KvFlavor, KvStore, MemoryKvStore};
pub use memory::{EnhancedMemoryCacheMap, MemoryCacheMap};
