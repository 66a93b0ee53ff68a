//! The string-KV store abstraction and its in-memory and file-backed stores

use locache_core::{CacheError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A synchronous string-keyed string store with quota semantics.
///
/// `set_item` fails with `StorageFull` when the store's byte quota would be
/// exceeded; the cache map layered on top reacts by cleaning up old entries
/// and retrying once.
pub trait KvStore: Send + Sync + 'static {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    /// Every key currently present, in stable order
    fn keys(&self) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    fn clear(&self) -> Result<()>;

    /// Bytes currently consumed by keys and values
    fn used_bytes(&self) -> Result<usize>;
}

fn map_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

fn check_quota(
    entries: &BTreeMap<String, String>,
    quota: Option<usize>,
    key: &str,
    value: &str,
) -> Result<()> {
    let Some(quota) = quota else { return Ok(()) };
    let current = map_bytes(entries);
    let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    if current - replaced + key.len() + value.len() > quota {
        return Err(CacheError::StorageFull);
    }
    Ok(())
}

/// Ephemeral in-process store; contents live and die with the process
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKvStore {
    pub fn new(quota_bytes: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota_bytes,
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        check_quota(&entries, self.quota_bytes, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn used_bytes(&self) -> Result<usize> {
        Ok(map_bytes(&self.entries.read()))
    }
}

/// Persistent store keeping all entries in one JSON file.
///
/// The whole map is rewritten on every mutation; suitable for the modest
/// entry counts a client-side cache holds.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl FileKvStore {
    /// Open or create the backing file
    pub fn open(path: impl AsRef<Path>, quota_bytes: Option<usize>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;
            serde_json::from_str(&raw)
                .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;
            }
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            quota_bytes,
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let raw = serde_json::to_string(entries).map_err(CacheError::serde)?;
        std::fs::write(&self.path, raw).map_err(|e| CacheError::Storage(e.to_string()))
    }
}

impl KvStore for FileKvStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        check_quota(&entries, self.quota_bytes, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        entries.clear();
        self.persist(&entries)
    }

    fn used_bytes(&self) -> Result<usize> {
        Ok(map_bytes(&self.entries.read()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryKvStore::new(None);
        store.set_item("a", "1").unwrap();
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.len().unwrap(), 1);

        store.remove_item("a").unwrap();
        assert!(store.get_item("a").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryKvStore::new(Some(10));
        store.set_item("ab", "cdef").unwrap(); // 6 bytes
        let err = store.set_item("gh", "ijklmn").unwrap_err(); // would be 14
        assert!(matches!(err, CacheError::StorageFull));

        // replacement is charged net of the replaced entry
        store.set_item("ab", "cd").unwrap();
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let store = FileKvStore::open(&path, None).unwrap();
            store.set_item("a", "1").unwrap();
            store.set_item("b", "2").unwrap();
        }

        let store = FileKvStore::open(&path, None).unwrap();
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileKvStore::open(&path, None).unwrap_err();
        assert!(matches!(err, CacheError::StorageUnavailable(_)));
    }

    #[test]
    fn test_file_store_quota() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open(dir.path().join("c.json"), Some(8)).unwrap();
        store.set_item("abcd", "efgh").unwrap();
        assert!(matches!(
            store.set_item("x", "y").unwrap_err(),
            CacheError::StorageFull
        ));
    }
}
