//! The cached item contract

use crate::key::ItemKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named audit/lifecycle event carried by an item.
///
/// `by` references the item that caused the event; the aggregator resolves
/// it into `agg` on request. `agg` is transient and never round-trips to
/// the remote API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<ItemKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<Value>,
}

/// A populated aggregate slot: the foreign key and the resolved item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefAggregate {
    pub key: ItemKey,
    pub item: Value,
}

/// Trait for record-shaped entities stored in a cache.
///
/// An item carries its own key, optional named foreign-key pointers
/// (`refs`) and optional named events. The aggregate-attachment hooks are
/// no-ops by default; types that expose `aggs` slots override them.
pub trait Item: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The item's own key
    fn key(&self) -> ItemKey;

    /// Named foreign-key pointers to other items
    fn refs(&self) -> BTreeMap<String, ItemKey> {
        BTreeMap::new()
    }

    /// Named lifecycle events
    fn events(&self) -> BTreeMap<String, ItemEvent> {
        BTreeMap::new()
    }

    /// Attach a populated aggregate for the named ref slot
    fn set_ref_aggregate(&mut self, _name: &str, _agg: RefAggregate) {}

    /// Attach the resolved `by` item for the named event slot
    fn set_event_aggregate(&mut self, _name: &str, _resolved: Value) {}
}

/// Serialized-size estimate used for metadata and byte-bounded eviction
pub fn estimated_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
