//! Structured item queries and their canonical hashes

use crate::key::{ItemKey, LocKey, normalize_loc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A structured predicate over items.
///
/// Filters match top-level fields of the serialized item by equality;
/// `limit`/`offset` window the matched set. The ordered filter map makes
/// the query canonically serializable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemQuery {
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter on a top-level field
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// True when the query matches every item
    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply the filter set to a serialized item
    pub fn matches(&self, item: &Value) -> bool {
        self.filters.iter().all(|(field, expected)| {
            item.get(field).map(|actual| actual == expected).unwrap_or(false)
        })
    }

    /// Apply `offset`/`limit` windowing to a matched list
    pub fn window<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if let Some(offset) = self.offset {
            items = items.into_iter().skip(offset).collect();
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

const FNV_OFFSET_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME_64: u64 = 0x0000_0100_0000_01b3;

fn hash_canonical(value: &Value) -> String {
    let mut hash = FNV_OFFSET_64;
    for b in value.to_string().as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME_64);
    }
    format!("{hash:016x}")
}

/// Stable hash of a query scoped by a location prefix
pub fn query_hash(query: &ItemQuery, locations: &[LocKey]) -> String {
    let mut obj = Map::new();
    obj.insert("loc".to_string(), Value::Array(normalize_loc(locations)));
    obj.insert(
        "q".to_string(),
        serde_json::to_value(query).unwrap_or(Value::Null),
    );
    hash_canonical(&Value::Object(obj))
}

/// Stable hash of a named finder invocation scoped by a location prefix
pub fn finder_hash(finder: &str, params: &Value, locations: &[LocKey]) -> String {
    let mut obj = Map::new();
    obj.insert("finder".to_string(), Value::String(finder.to_string()));
    obj.insert("loc".to_string(), Value::Array(normalize_loc(locations)));
    obj.insert("params".to_string(), params.clone());
    hash_canonical(&Value::Object(obj))
}

/// A memoized query result: the matching item keys and an optional expiry.
///
/// Serialized stores wrote a bare key array historically; readers accept
/// both the modern object form and the legacy array form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResultEntry {
    #[serde(rename = "itemKeys")]
    pub item_keys: Vec<ItemKey>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl QueryResultEntry {
    pub fn new(item_keys: Vec<ItemKey>, expires_at: Option<u64>) -> Self {
        Self {
            item_keys,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|e| now >= e).unwrap_or(false)
    }
}

impl<'de> Deserialize<'de> for QueryResultEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Modern {
                #[serde(rename = "itemKeys")]
                item_keys: Vec<ItemKey>,
                #[serde(rename = "expiresAt", default)]
                expires_at: Option<u64>,
            },
            Legacy(Vec<ItemKey>),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Modern {
                item_keys,
                expires_at,
            } => QueryResultEntry {
                item_keys,
                expires_at,
            },
            Wire::Legacy(item_keys) => QueryResultEntry {
                item_keys,
                expires_at: None,
            },
        })
    }
}
