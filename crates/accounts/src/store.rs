//! Key-value record stores.
//!
//! Records are JSON values addressed by string keys. Every mutation goes
//! through [`RecordStore::update`], which runs under a single lock so
//! concurrent read-modify-write sequences never interleave.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record {key} is not an object")]
    NotAnObject { key: String },

    #[error("field {field} of {key} is not an integer")]
    NotAnInteger { key: String, field: String },
}

/// Serialized access to JSON records.
pub trait RecordStore: Send + Sync {
    /// Returns the record stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Atomically replaces the record under `key` with `f(current)`.
    ///
    /// Returning `None` removes the record. The new value is returned.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError>;

    /// Stores `value` under `key`, replacing any previous record.
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut value = Some(value);
        self.update(key, &mut |_| value.take())?;
        Ok(())
    }

    /// Removes the record under `key`, returning it if it existed.
    fn remove(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut previous = None;
        self.update(key, &mut |current| {
            previous = current;
            None
        })?;
        Ok(previous)
    }

    /// Adds `delta` to the integer `field` of the record under `key`.
    ///
    /// A missing record or field counts as zero. Returns the new value.
    fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut outcome: Result<i64, StoreError> = Ok(0);
        self.update(key, &mut |current| {
            let mut record = current.unwrap_or_else(|| Value::Object(Default::default()));
            let Some(object) = record.as_object_mut() else {
                outcome = Err(StoreError::NotAnObject {
                    key: key.to_string(),
                });
                return Some(record);
            };
            let count = match object.get(field) {
                None | Some(Value::Null) => 0,
                Some(v) => match v.as_i64() {
                    Some(n) => n,
                    None => {
                        outcome = Err(StoreError::NotAnInteger {
                            key: key.to_string(),
                            field: field.to_string(),
                        });
                        return Some(record);
                    }
                },
            };
            let next = count.saturating_add(delta);
            object.insert(field.to_string(), Value::from(next));
            outcome = Ok(next);
            Some(record)
        })?;
        outcome
    }
}

type Records = BTreeMap<String, Value>;

fn lock(records: &Mutex<Records>) -> MutexGuard<'_, Records> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies `f` to one entry and returns `(previous, new)`.
fn apply(
    map: &mut Records,
    key: &str,
    f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
) -> (Option<Value>, Option<Value>) {
    let previous = map.get(key).cloned();
    let next = f(previous.clone());
    match &next {
        Some(value) => {
            map.insert(key.to_string(), value.clone());
        }
        None => {
            map.remove(key);
        }
    }
    (previous, next)
}

/// In-memory store, used in tests and for throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.records).get(key).cloned())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let mut map = lock(&self.records);
        let (_, next) = apply(&mut map, key, f);
        Ok(next)
    }
}

/// Store persisted to a single JSON file.
///
/// Records are cached in memory and the whole map is rewritten after every
/// mutation. Writes go to a sibling temp file that is then renamed over the
/// existing file, so a crash never leaves a truncated file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading existing records if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &Records) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(map)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} record(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.records).get(key).cloned())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        let mut map = lock(&self.records);
        let (previous, next) = apply(&mut map, key, f);
        if previous == next {
            return Ok(next);
        }
        if let Err(e) = self.persist(&map) {
            // Keep memory in line with what is on disk.
            match previous {
                Some(value) => map.insert(key.to_string(), value),
                None => map.remove(key),
            };
            return Err(e);
        }
        Ok(next)
    }
}

fn load_records(path: &Path) -> Result<Records, StoreError> {
    if !path.exists() {
        return Ok(Records::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Records::new());
    }
    let records: Records = serde_json::from_str(&data)?;
    debug!("loaded {} record(s) from {:?}", records.len(), path);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn file_store() -> (tempfile::TempDir, JsonFileStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path().join("records.json")).unwrap();
        (tmp, store)
    }

    #[test]
    fn memory_put_get_remove() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.put("a", json!({"x": 1})).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove("a").unwrap(), Some(json!({"x": 1})));
        assert!(store.remove("a").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn increment_creates_record_and_field() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("user/1", "uploads", 1).unwrap(), 1);
        assert_eq!(store.increment("user/1", "uploads", 2).unwrap(), 3);
        assert_eq!(store.get("user/1").unwrap(), Some(json!({"uploads": 3})));
    }

    #[test]
    fn increment_rejects_non_integer_field() {
        let store = MemoryStore::new();
        store.put("user/1", json!({"uploads": "many"})).unwrap();
        let err = store.increment("user/1", "uploads", 1).unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { .. }));
        // Record left untouched.
        assert_eq!(store.get("user/1").unwrap(), Some(json!({"uploads": "many"})));
    }

    #[test]
    fn increment_rejects_non_object_record() {
        let store = MemoryStore::new();
        store.put("k", json!(5)).unwrap();
        let err = store.increment("k", "n", 1).unwrap_err();
        assert!(matches!(err, StoreError::NotAnObject { .. }));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.increment("user/1", "uploads", 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("user/1").unwrap(), Some(json!({"uploads": 800})));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let (tmp, store) = file_store();
        store.put("user/1", json!({"is_premium": true})).unwrap();
        store.increment("user/1", "uploads", 4).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(tmp.path().join("records.json")).unwrap();
        assert_eq!(
            reopened.get("user/1").unwrap(),
            Some(json!({"is_premium": true, "uploads": 4}))
        );
        assert!(!tmp.path().join("records.json.tmp").exists());
    }

    #[test]
    fn file_store_remove_persists() {
        let (tmp, store) = file_store();
        store.put("key/ABC", json!(true)).unwrap();
        assert!(store.remove("key/ABC").unwrap().is_some());
        drop(store);

        let reopened = JsonFileStore::open(tmp.path().join("records.json")).unwrap();
        assert!(reopened.get("key/ABC").unwrap().is_none());
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let (_tmp, store) = file_store();
        assert!(store.get("anything").unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn file_store_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("dir").join("records.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.put("a", json!(1)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).unwrap_err(),
            StoreError::Json(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_tmp, store) = file_store();
        store.put("a", json!(1)).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
