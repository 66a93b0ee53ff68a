//! Build cache maps from configuration

use locache_core::{CacheConfig, CacheError, CacheType, Item, Result};

use crate::cache_map::CacheMap;
use crate::indexed::IndexedCacheMap;
use crate::kv::KvCacheMap;
use crate::memory::{EnhancedMemoryCacheMap, MemoryCacheMap};

/// Caller-supplied factory used for `CacheType::Custom` and for `reset`.
///
/// Invoked with the coordinate's key-type array.
pub trait CacheMapFactory<V: Item>: Send + Sync {
    fn create(&self, kta: &[String]) -> Result<Box<dyn CacheMap<V>>>;
}

impl<V: Item, F> CacheMapFactory<V> for F
where
    F: Fn(&[String]) -> Result<Box<dyn CacheMap<V>>> + Send + Sync,
{
    fn create(&self, kta: &[String]) -> Result<Box<dyn CacheMap<V>>> {
        self(kta)
    }
}

/// Construct the cache map selected by `config.cache_type`.
///
/// KV-backed maps are namespaced by the coordinate's primary type tag so
/// sibling caches sharing one physical store cannot collide.
pub fn create_cache_map<V: Item>(
    config: &CacheConfig,
    kta: &[String],
    custom: Option<&dyn CacheMapFactory<V>>,
) -> Result<Box<dyn CacheMap<V>>> {
    config.validate()?;
    let namespace = kta.first().map(String::as_str).unwrap_or("");

    match config.cache_type {
        CacheType::Memory => Ok(Box::new(MemoryCacheMap::new())),
        CacheType::EnhancedMemory => Ok(Box::new(EnhancedMemoryCacheMap::new(
            config.memory.resolve_limits()?,
        ))),
        CacheType::Session => Ok(Box::new(KvCacheMap::session(&config.kv, namespace)?)),
        CacheType::Local => Ok(Box::new(KvCacheMap::local(&config.kv, namespace)?)),
        CacheType::Indexed => Ok(Box::new(IndexedCacheMap::from_config(&config.indexed)?)),
        CacheType::Custom => match custom {
            Some(factory) => factory.create(kta),
            None => Err(CacheError::ConfigInvalid(
                "custom cache type requires a cache map factory".to_string(),
            )),
        },
    }
}
