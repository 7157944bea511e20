//! Synchronous key-value persistence shared by the planner, the sync
//! bookkeeping and the holiday cache. Values are JSON strings.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

pub mod keys {
    pub const GOALS: &str = "planner_goals";
    pub const TODOS: &str = "planner_todos";
    pub const DIARY: &str = "planner_diary";
    pub const COMPLETED_TASKS: &str = "planner_completed_tasks";

    pub const MIRRORED: &str = "planner_mirrored";
    pub const RETRY_COUNT: &str = "planner_sync_retry_count";
    pub const LAST_ATTEMPT: &str = "planner_last_sync_attempt";

    pub const HOLIDAY_CACHE_PREFIX: &str = "holiday_cache_";
}

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Whole-map JSON file, rewritten atomically on every mutation.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("planner-store.json");
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "Local store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}

/// Scopes every key under `"{namespace}:"`, one namespace per account.
pub struct Namespaced {
    inner: Arc<dyn LocalStore>,
    prefix: String,
}

impl Namespaced {
    pub fn new(inner: Arc<dyn LocalStore>, namespace: impl std::fmt::Display) -> Self {
        Self {
            inner,
            prefix: format!("{namespace}:"),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl LocalStore for Namespaced {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.scoped(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(&self.scoped(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(&self.scoped(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

pub fn load_json<T: DeserializeOwned>(
    store: &dyn LocalStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn LocalStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, &serde_json::to_string(value)?)
}

/// Load a stored collection, dropping records that no longer decode
/// instead of failing the whole load.
pub fn load_records<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Vec<T> {
    let raw: Vec<serde_json::Value> = match load_json(store, key) {
        Ok(Some(values)) => values,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(key = key, error = %e, "Discarding unreadable local collection");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Dropping corrupt local record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::diary::DiaryEntry;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("a", "1").unwrap();
            store.set("b", "2").unwrap();
            store.remove("b").unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let shared: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let alice = Namespaced::new(shared.clone(), "alice");
        let bob = Namespaced::new(shared.clone(), "bob");

        alice.set(keys::GOALS, "[]").unwrap();
        assert!(bob.get(keys::GOALS).unwrap().is_none());
        assert_eq!(alice.keys().unwrap(), vec![keys::GOALS.to_string()]);
        assert_eq!(shared.keys().unwrap(), vec!["alice:planner_goals".to_string()]);
    }

    #[test]
    fn test_corrupt_records_are_dropped() {
        let store = MemoryStore::new();
        store
            .set(
                keys::DIARY,
                r#"[{"id":"6f1c1b7e-3a57-4b8e-9d0a-2f4c8a1b2c3d","date":"2025-01-02","content":"ok"},{},{"date":"2025-01-03"}]"#,
            )
            .unwrap();
        let entries: Vec<DiaryEntry> = load_records(&store, keys::DIARY);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "ok");

        store.set(keys::TODOS, "not json").unwrap();
        let todos: Vec<DiaryEntry> = load_records(&store, keys::TODOS);
        assert!(todos.is_empty());
    }
}
