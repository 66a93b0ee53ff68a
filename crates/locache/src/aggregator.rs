//! Aggregation of cross-entity references through sibling caches

use async_trait::async_trait;
use futures::future::try_join_all;
use locache_core::{
    CacheError, Item, ItemApi, ItemKey, ItemQuery, LocKey, RefAggregate, Result, normalize,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{Cache, Retrieval};

/// Type-erased read capability a sibling cache exposes to aggregators
#[async_trait]
pub trait SiblingCache: Send + Sync {
    /// Retrieve an item as its serialized form; `None` when absent
    async fn retrieve_value(&self, key: &ItemKey) -> Result<Option<Value>>;
}

#[async_trait]
impl<V: Item, A: ItemApi<V>> SiblingCache for Cache<V, A> {
    async fn retrieve_value(&self, key: &ItemKey) -> Result<Option<Value>> {
        match self.retrieve(key).await?.value {
            Some(item) => Ok(Some(
                serde_json::to_value(&item).map_err(CacheError::serde)?,
            )),
            None => Ok(None),
        }
    }
}

/// How one named slot is populated
pub struct AggregateSpec {
    pub cache: Arc<dyn SiblingCache>,
    pub optional: bool,
}

impl AggregateSpec {
    pub fn required(cache: Arc<dyn SiblingCache>) -> Self {
        Self {
            cache,
            optional: false,
        }
    }

    pub fn optional(cache: Arc<dyn SiblingCache>) -> Self {
        Self {
            cache,
            optional: true,
        }
    }
}

/// Wraps a base cache so returned items come back populated: each
/// configured ref slot resolves through its sibling cache into an
/// attached aggregate, and each configured event slot resolves its `by`
/// key. Missing non-optional slots fail the operation.
///
/// Population runs concurrently across items but sequentially per item
/// across named slots, because later slots may depend on earlier ones
/// through the sibling caches.
pub struct Aggregator<V: Item, A: ItemApi<V>> {
    base: Cache<V, A>,
    aggregates: BTreeMap<String, AggregateSpec>,
    events: BTreeMap<String, AggregateSpec>,
}

impl<V: Item, A: ItemApi<V>> Aggregator<V, A> {
    pub fn new(base: Cache<V, A>) -> Self {
        Self {
            base,
            aggregates: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    /// Configure a ref slot
    pub fn aggregate(mut self, name: impl Into<String>, spec: AggregateSpec) -> Self {
        self.aggregates.insert(name.into(), spec);
        self
    }

    /// Configure an event slot
    pub fn event(mut self, name: impl Into<String>, spec: AggregateSpec) -> Self {
        self.events.insert(name.into(), spec);
        self
    }

    /// The wrapped cache
    pub fn base(&self) -> &Cache<V, A> {
        &self.base
    }

    async fn populate(&self, item: &mut V) -> Result<()> {
        let item_key = normalize(&item.key());

        for (name, spec) in &self.aggregates {
            let refs = item.refs();
            match refs.get(name) {
                None => {
                    if !spec.optional {
                        return Err(CacheError::MissingRef {
                            name: name.clone(),
                            key: item_key.clone(),
                        });
                    }
                }
                Some(ref_key) => match spec.cache.retrieve_value(ref_key).await? {
                    Some(resolved) => item.set_ref_aggregate(
                        name,
                        RefAggregate {
                            key: ref_key.clone(),
                            item: resolved,
                        },
                    ),
                    None => {
                        if !spec.optional {
                            return Err(CacheError::MissingRef {
                                name: name.clone(),
                                key: item_key.clone(),
                            });
                        }
                    }
                },
            }
        }

        for (name, spec) in &self.events {
            let events = item.events();
            match events.get(name) {
                None => {
                    if !spec.optional {
                        return Err(CacheError::MissingEvent {
                            name: name.clone(),
                            key: item_key.clone(),
                        });
                    }
                }
                Some(event) => {
                    // an event present in the item must name its actor
                    let Some(by) = &event.by else {
                        return Err(CacheError::MissingEvent {
                            name: name.clone(),
                            key: item_key.clone(),
                        });
                    };
                    match spec.cache.retrieve_value(by).await? {
                        Some(resolved) => item.set_event_aggregate(name, resolved),
                        None => {
                            if !spec.optional {
                                return Err(CacheError::MissingEvent {
                                    name: name.clone(),
                                    key: item_key.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn populate_all(&self, items: &mut [V]) -> Result<()> {
        try_join_all(items.iter_mut().map(|item| self.populate(item))).await?;
        Ok(())
    }

    /// `get` with population
    pub async fn get(&self, key: &ItemKey) -> Result<Option<V>> {
        match self.base.get(key).await? {
            None => Ok(None),
            Some(mut item) => {
                self.populate(&mut item).await?;
                Ok(Some(item))
            }
        }
    }

    /// `retrieve` with population
    pub async fn retrieve(&self, key: &ItemKey) -> Result<Retrieval<V>> {
        let mut retrieval = self.base.retrieve(key).await?;
        if let Some(item) = &mut retrieval.value {
            self.populate(item).await?;
        }
        Ok(retrieval)
    }

    /// `all` with population
    pub async fn all(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Vec<V>> {
        let mut items = self.base.all(query, locations).await?;
        self.populate_all(&mut items).await?;
        Ok(items)
    }

    /// `one` with population
    pub async fn one(&self, query: &ItemQuery, locations: &[LocKey]) -> Result<Option<V>> {
        match self.base.one(query, locations).await? {
            None => Ok(None),
            Some(mut item) => {
                self.populate(&mut item).await?;
                Ok(Some(item))
            }
        }
    }

    /// `find` with population
    pub async fn find(
        &self,
        finder: &str,
        params: &Value,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        let mut items = self.base.find(finder, params, locations).await?;
        self.populate_all(&mut items).await?;
        Ok(items)
    }

    /// `create` with population of the created item
    pub async fn create(&self, item: V, locations: &[LocKey]) -> Result<V> {
        let mut created = self.base.create(item, locations).await?;
        self.populate(&mut created).await?;
        Ok(created)
    }

    /// `update` with population of the updated item
    pub async fn update(&self, key: &ItemKey, item: V) -> Result<V> {
        let mut updated = self.base.update(key, item).await?;
        self.populate(&mut updated).await?;
        Ok(updated)
    }

    /// `remove`, unchanged from the base
    pub async fn remove(&self, key: &ItemKey) -> Result<()> {
        self.base.remove(key).await
    }

    /// `action` with population of the refreshed item
    pub async fn action(&self, key: &ItemKey, action: &str, body: &Value) -> Result<V> {
        let mut refreshed = self.base.action(key, action, body).await?;
        self.populate(&mut refreshed).await?;
        Ok(refreshed)
    }

    /// `all_action` with population
    pub async fn all_action(
        &self,
        action: &str,
        body: &Value,
        locations: &[LocKey],
    ) -> Result<Vec<V>> {
        let mut items = self.base.all_action(action, body, locations).await?;
        self.populate_all(&mut items).await?;
        Ok(items)
    }
}
