//! The consumed remote item API contract

use crate::error::Result;
use crate::item::Item;
use crate::key::{ItemKey, LocKey};
use crate::options::CacheConfig;
use crate::query::ItemQuery;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Per-call options handed through to the API adapter.
///
/// Retry policy belongs to the adapter; the cache only carries the bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl From<&CacheConfig> for ApiOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }
}

/// Remote CRUD + action API for one entity type.
///
/// The cache composes over this adapter; everything network-shaped
/// (transport, retries, cancellation) lives behind it.
#[async_trait]
pub trait ItemApi<V: Item>: Send + Sync + 'static {
    /// Fetch a single item; `None` when the server reports absence
    async fn get(&self, key: &ItemKey) -> Result<Option<V>>;

    /// Fetch all items matching a query within a location scope
    async fn all(
        &self,
        query: &ItemQuery,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>>;

    /// Fetch at most one item matching a query within a location scope
    async fn one(
        &self,
        query: &ItemQuery,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Option<V>>;

    /// Invoke a named server-side finder
    async fn find(
        &self,
        finder: &str,
        params: &Value,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>>;

    /// Create an item; the returned item is authoritative
    async fn create(&self, item: V, options: &ApiOptions, locations: &[LocKey]) -> Result<V>;

    /// Update an item; the returned item is authoritative
    async fn update(&self, key: &ItemKey, item: V, options: &ApiOptions) -> Result<V>;

    /// Remove an item
    async fn remove(&self, key: &ItemKey, options: &ApiOptions) -> Result<()>;

    /// Invoke a named side-effectful action on one item
    async fn action(
        &self,
        key: &ItemKey,
        action: &str,
        body: &Value,
        options: &ApiOptions,
    ) -> Result<V>;

    /// Invoke a named bulk action within a location scope
    async fn all_action(
        &self,
        action: &str,
        body: &Value,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>>;
}

#[async_trait]
impl<V: Item, A: ItemApi<V> + ?Sized> ItemApi<V> for Arc<A> {
    async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        (**self).get(key).await
    }

    async fn all(
        &self,
        query: &ItemQuery,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        (**self).all(query, options, locations).await
    }

    async fn one(
        &self,
        query: &ItemQuery,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Option<V>> {
        (**self).one(query, options, locations).await
    }

    async fn find(
        &self,
        finder: &str,
        params: &Value,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        (**self).find(finder, params, options, locations).await
    }

    async fn create(&self, item: V, options: &ApiOptions, locations: &[LocKey]) -> Result<V> {
        (**self).create(item, options, locations).await
    }

    async fn update(&self, key: &ItemKey, item: V, options: &ApiOptions) -> Result<V> {
        (**self).update(key, item, options).await
    }

    async fn remove(&self, key: &ItemKey, options: &ApiOptions) -> Result<()> {
        (**self).remove(key, options).await
    }

    async fn action(
        &self,
        key: &ItemKey,
        action: &str,
        body: &Value,
        options: &ApiOptions,
    ) -> Result<V> {
        (**self).action(key, action, body, options).await
    }

    async fn all_action(
        &self,
        action: &str,
        body: &Value,
        options: &ApiOptions,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        (**self).all_action(action, body, options, locations).await
    }
}
