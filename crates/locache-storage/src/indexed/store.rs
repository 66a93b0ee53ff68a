//! The asynchronous document store abstraction

use async_trait::async_trait;
use dashmap::DashMap;
use locache_core::{CacheError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// An asynchronous JSON-document store.
///
/// `open` is lazy and idempotent; every other operation may assume an
/// opened store. Keys are flat strings (`<hash>` for items,
/// `query:<hash>` for query results).
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn open(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, doc: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;
}

/// In-process document store, mostly for tests and ephemeral caches
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: DashMap<String, Value>,
    opened: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn open(&self) -> Result<()> {
        self.opened.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.docs.get(key).map(|d| d.clone()))
    }

    async fn put(&self, key: &str, doc: Value) -> Result<()> {
        self.docs.insert(key.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.docs.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.docs.iter().map(|d| d.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.docs.clear();
        Ok(())
    }
}

/// File-backed document store: one JSON file per document under
/// `<root>/<db_name>/v<version>/<store_name>/`.
pub struct FileDocumentStore {
    dir: PathBuf,
    opened: AtomicBool,
}

impl FileDocumentStore {
    pub fn new(root: impl AsRef<Path>, db_name: &str, version: u32, store_name: &str) -> Self {
        let dir = root
            .as_ref()
            .join(db_name)
            .join(format!("v{version}"))
            .join(store_name);
        Self {
            dir,
            opened: AtomicBool::new(false),
        }
    }

    // store keys may contain ':' (query results); filenames may not, portably
    fn file_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key.replace(':', "@")))
    }

    fn key_for(file_stem: &str) -> String {
        file_stem.replace('@', ":")
    }

    async fn ensure_open(&self) -> Result<()> {
        if !self.opened.load(Ordering::Relaxed) {
            self.open().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn open(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;
        self.opened.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open().await?;
        match tokio::fs::read_to_string(self.file_for(key)).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(CacheError::serde),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Storage(e.to_string())),
        }
    }

    async fn put(&self, key: &str, doc: Value) -> Result<()> {
        self.ensure_open().await?;
        tokio::fs::write(self.file_for(key), doc.to_string())
            .await
            .map_err(|e| CacheError::Storage(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open().await?;
        match tokio::fs::remove_file(self.file_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Storage(e.to_string())),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open().await?;
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::Storage(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::Storage(e.to_string()))?
        {
            let name = entry.file_name();
            if let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) {
                keys.push(Self::key_for(stem));
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
