//! Asynchronous indexed document-store cache map

mod backend;
mod store;

pub use backend::IndexedCacheMap;
pub use store::{DocumentStore, FileDocumentStore, MemoryDocumentStore};
