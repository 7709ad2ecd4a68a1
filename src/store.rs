//! Keyed storage shared by the solution cache and the solve queue.
//!
//! Backends only promise atomic operations on a single key: read, conditional read-modify-write,
//! conditional remove, and a full scan. Anything spanning several keys is a sequence of those.
//! The JSON file backend keeps that promise across processes sharing one file.

use crate::StateKey;
use fs4::fs_std::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait Store<V>: Send + Sync {
    fn get(&self, key: &StateKey) -> StoreResult<Option<V>>;

    /// Atomically passes the current value to `f`. When `f` returns a value it replaces the
    /// stored one. Returns the value held after the call.
    fn update(
        &self,
        key: &StateKey,
        f: &mut dyn FnMut(Option<&V>) -> Option<V>,
    ) -> StoreResult<Option<V>>;

    /// Atomically removes `key` if `predicate` accepts its current value. Returns whether
    /// anything was removed.
    fn remove_if(
        &self,
        key: &StateKey,
        predicate: &mut dyn FnMut(&V) -> bool,
    ) -> StoreResult<bool>;

    /// Removes `key`, returning whether it existed.
    fn remove(&self, key: &StateKey) -> StoreResult<bool> {
        self.remove_if(key, &mut |_| true)
    }

    /// Snapshot of every value.
    fn values(&self) -> StoreResult<Vec<V>>;
}

/// Process-local store.
#[derive(Debug)]
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<StateKey, V>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone + Send + Sync> Store<V> for MemoryStore<V> {
    fn get(&self, key: &StateKey) -> StoreResult<Option<V>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn update(
        &self,
        key: &StateKey,
        f: &mut dyn FnMut(Option<&V>) -> Option<V>,
    ) -> StoreResult<Option<V>> {
        let mut entries = self.entries.write();
        if let Some(value) = f(entries.get(key)) {
            entries.insert(key.clone(), value);
        }
        Ok(entries.get(key).cloned())
    }

    fn remove_if(
        &self,
        key: &StateKey,
        predicate: &mut dyn FnMut(&V) -> bool,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write();
        if entries.get(key).map_or(false, |value| predicate(value)) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn values(&self) -> StoreResult<Vec<V>> {
        Ok(self.entries.read().values().cloned().collect())
    }
}

#[derive(Serialize, Deserialize)]
struct Record<V> {
    key: StateKey,
    value: V,
}

/// Store persisted as a JSON document that any number of processes may open.
///
/// Nothing is kept in memory between calls. Reads take a shared lock on a sibling `.lock` file
/// and load the document; writes take the exclusive lock, reload, apply the change and replace
/// the document through a temporary file and a rename before unlocking.
pub struct JsonFileStore<V> {
    path: PathBuf,
    lock_path: PathBuf,
    // flock is per open file, this keeps threads of one process in line as well
    local: Mutex<()>,
    _values: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> JsonFileStore<V> {
    /// Opens `path`, starting empty when the file does not exist yet. An unreadable document is
    /// reported here rather than on first use.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        let store = Self {
            lock_path: PathBuf::from(lock_name),
            path,
            local: Mutex::new(()),
            _values: PhantomData,
        };
        let entries = store.shared(|| store.load())?;
        info!("Opened {} with {} entries", store.path.display(), entries.len());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    fn shared<T>(&self, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let file = self.lock_file()?;
        FileExt::lock_shared(&file)?;
        let result = f();
        FileExt::unlock(&file)?;
        result
    }

    fn exclusive<T>(&self, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        let _local = self.local.lock();
        let file = self.lock_file()?;
        FileExt::lock_exclusive(&file)?;
        let result = f();
        FileExt::unlock(&file)?;
        result
    }

    fn load(&self) -> StoreResult<HashMap<StateKey, V>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<Record<V>> = serde_json::from_slice(&bytes)?;
        Ok(records.into_iter().map(|r| (r.key, r.value)).collect())
    }

    fn persist(&self, entries: &HashMap<StateKey, V>) -> StoreResult<()> {
        let records: Vec<Record<&V>> = entries
            .iter()
            .map(|(key, value)| Record {
                key: key.clone(),
                value,
            })
            .collect();
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&records)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} entries to {}", records.len(), self.path.display());
        Ok(())
    }
}

impl<V> Store<V> for JsonFileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    fn get(&self, key: &StateKey) -> StoreResult<Option<V>> {
        self.shared(|| Ok(self.load()?.remove(key)))
    }

    fn update(
        &self,
        key: &StateKey,
        f: &mut dyn FnMut(Option<&V>) -> Option<V>,
    ) -> StoreResult<Option<V>> {
        self.exclusive(|| {
            let mut entries = self.load()?;
            if let Some(value) = f(entries.get(key)) {
                entries.insert(key.clone(), value);
                self.persist(&entries)?;
            }
            Ok(entries.remove(key))
        })
    }

    fn remove_if(
        &self,
        key: &StateKey,
        predicate: &mut dyn FnMut(&V) -> bool,
    ) -> StoreResult<bool> {
        self.exclusive(|| {
            let mut entries = self.load()?;
            if !entries.get(key).map_or(false, |value| predicate(value)) {
                return Ok(false);
            }
            entries.remove(key);
            self.persist(&entries)?;
            Ok(true)
        })
    }

    fn values(&self) -> StoreResult<Vec<V>> {
        self.shared(|| Ok(self.load()?.into_values().collect()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// A backend that is always down.
    pub(crate) struct DownStore;

    impl<V> Store<V> for DownStore {
        fn get(&self, _key: &StateKey) -> StoreResult<Option<V>> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        fn update(
            &self,
            _key: &StateKey,
            _f: &mut dyn FnMut(Option<&V>) -> Option<V>,
        ) -> StoreResult<Option<V>> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        fn remove_if(
            &self,
            _key: &StateKey,
            _predicate: &mut dyn FnMut(&V) -> bool,
        ) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        fn values(&self) -> StoreResult<Vec<V>> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    pub(crate) fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!(
            "peg_hint_{}_{}_{}.json",
            name,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn test_memory_conditional_update() {
        let store: MemoryStore<u32> = MemoryStore::new();
        let key = StateKey::new("english", 5);
        let first = store.update(&key, &mut |cur| cur.is_none().then_some(1)).unwrap();
        assert_eq!(first, Some(1));
        let second = store.update(&key, &mut |cur| cur.is_none().then_some(2)).unwrap();
        assert_eq!(second, Some(1), "condition failed, value unchanged");
        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_store_persists_across_reopen() {
        let path = temp_path("reopen");
        {
            let store: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
            store
                .update(&StateKey::new("wiegleb", 42), &mut |_| Some("kept".to_string()))
                .unwrap();
            store
                .update(&StateKey::new("wiegleb", 7), &mut |_| Some("gone".to_string()))
                .unwrap();
            assert!(store.remove(&StateKey::new("wiegleb", 7)).unwrap());
        }
        let reopened: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(&StateKey::new("wiegleb", 42)).unwrap(),
            Some("kept".to_string())
        );
        assert_eq!(reopened.values().unwrap().len(), 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let path = temp_path("corrupt");
        fs::write(&path, b"not json").unwrap();
        let result: StoreResult<JsonFileStore<String>> = JsonFileStore::open(&path);
        assert!(matches!(result, Err(StoreError::Serialization(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_memory_remove_if_checks_value() {
        let store: MemoryStore<u32> = MemoryStore::new();
        let key = StateKey::new("english", 9);
        store.update(&key, &mut |_| Some(3)).unwrap();
        assert!(!store.remove_if(&key, &mut |v| *v == 4).unwrap());
        assert_eq!(store.get(&key).unwrap(), Some(3));
        assert!(store.remove_if(&key, &mut |v| *v == 3).unwrap());
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_json_handles_share_one_file() {
        let path = temp_path("shared");
        let a: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
        let b: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();

        a.update(&StateKey::new("wiegleb", 7), &mut |_| Some("from a".to_string()))
            .unwrap();
        assert_eq!(
            b.get(&StateKey::new("wiegleb", 7)).unwrap(),
            Some("from a".to_string())
        );

        // A write through `b` must not drop what `a` wrote
        b.update(&StateKey::new("wiegleb", 14), &mut |_| Some("from b".to_string()))
            .unwrap();
        assert_eq!(a.values().unwrap().len(), 2);

        // Conditional update sees the other handle's value
        let kept = b
            .update(&StateKey::new("wiegleb", 7), &mut |cur| {
                cur.is_none().then(|| "overwritten".to_string())
            })
            .unwrap();
        assert_eq!(kept, Some("from a".to_string()));

        assert!(a.remove(&StateKey::new("wiegleb", 14)).unwrap());
        assert_eq!(b.get(&StateKey::new("wiegleb", 14)).unwrap(), None);

        let reopened: JsonFileStore<String> = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.values().unwrap(), vec!["from a".to_string()]);
        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(&a.lock_path);
    }

    #[test]
    fn test_json_concurrent_updates_from_many_handles() {
        let path = temp_path("contended");
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let path = &path;
                scope.spawn(move || {
                    let store: JsonFileStore<u64> = JsonFileStore::open(path).unwrap();
                    for i in 0..10u64 {
                        store
                            .update(&StateKey::new("english", t * 100 + i), &mut |_| Some(i))
                            .unwrap();
                    }
                });
            }
        });
        let store: JsonFileStore<u64> = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.values().unwrap().len(), 40);
        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(&store.lock_path);
    }
}
