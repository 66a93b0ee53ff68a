//! Typed cache events and their pub/sub emitter

use crate::key::ItemKey;
use crate::metadata::now_millis;
use dashmap::DashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    ItemRetrieved,
    ItemSet,
    ItemDeleted,
    ItemEvicted,
    QueryExecuted,
    QueryInvalidated,
    CacheReset,
}

impl CacheEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventKind::ItemRetrieved => "item_retrieved",
            CacheEventKind::ItemSet => "item_set",
            CacheEventKind::ItemDeleted => "item_deleted",
            CacheEventKind::ItemEvicted => "item_evicted",
            CacheEventKind::QueryExecuted => "query_executed",
            CacheEventKind::QueryInvalidated => "query_invalidated",
            CacheEventKind::CacheReset => "cache_reset",
        }
    }
}

/// Where the observed value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Cache,
    Api,
    Operation,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Cache => "cache",
            EventSource::Api => "api",
            EventSource::Operation => "operation",
        }
    }
}

/// A cache event delivered to subscribers
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub source: EventSource,
    pub key: Option<ItemKey>,
    pub query_hash: Option<String>,
    pub at: u64,
    pub detail: Option<String>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, source: EventSource) -> Self {
        Self {
            kind,
            source,
            key: None,
            query_hash: None,
            at: now_millis(),
            detail: None,
        }
    }

    pub fn with_key(mut self, key: ItemKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_query_hash(mut self, hash: impl Into<String>) -> Self {
        self.query_hash = Some(hash.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
///
/// Dropping the id does NOT unsubscribe: subscriptions are explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Default)]
struct EmitterInner {
    next_id: AtomicU64,
    handlers: DashMap<u64, Handler>,
}

/// Pub/sub emitter for cache events.
///
/// Cloning creates a new handle to the SAME subscriber table.
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and return its id
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.insert(id, Box::new(handler));
        SubscriptionId(id)
    }

    /// Remove a handler; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.handlers.remove(&id.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Deliver an event to every subscriber.
    ///
    /// A panicking handler must not take down the emitting operation.
    pub fn emit(&self, event: CacheEvent) {
        for entry in self.inner.handlers.iter() {
            let _ = catch_unwind(AssertUnwindSafe(|| (entry.value())(&event)));
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
