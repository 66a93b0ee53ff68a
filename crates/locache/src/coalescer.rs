//! Per-key coalescing of in-flight requests

use dashmap::DashMap;
use locache_core::{CacheError, Result};
use std::sync::Arc;
use tokio::sync::broadcast;

/// De-duplicates concurrent requests by normalized key.
///
/// The first caller for a key becomes the leader and runs the factory;
/// everyone else joins the flight and receives a clone of the settled
/// result, success or failure. The entry is removed before any waiter
/// observes the result, so a failure never poisons later calls.
pub struct Coalescer<T: Clone + Send + 'static> {
    inflight: Arc<DashMap<String, broadcast::Sender<Result<T>>>>,
}

impl<T: Clone + Send + 'static> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Clone for Coalescer<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Number of flights currently pending
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Run `f` for `key`, or join the flight already running for it.
    pub async fn do_request<F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        // join an existing flight or become its leader; the entry lock is
        // dropped before any await
        let action = {
            match self.inflight.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    Ok(occupied.get().subscribe())
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let (tx, _rx) = broadcast::channel(1);
                    vacant.insert(tx.clone());
                    Err(tx)
                }
            }
        };

        match action {
            Ok(mut rx) => match rx.recv().await {
                Ok(result) => result,
                // leader dropped without sending (e.g. cancelled)
                Err(_) => Err(CacheError::Internal(
                    "in-flight request abandoned".to_string(),
                )),
            },
            Err(tx) => {
                let result = f().await;

                // cleanup first so a late joiner starts a fresh flight
                self.inflight.remove(key);

                if tx.receiver_count() > 0 {
                    let _ = tx.send(result.clone());
                }
                result
            }
        }
    }
}
