use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::warn;

use crate::errors::StoreError;

/// String key-value persistence injected into a `ChatSession`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|value| value.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Stores every key in a single JSON object file.
///
/// The file and its parent directories are created on first write. Writes go
/// through a temporary sibling file and a rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

type Entries = serde_json::Map<String, serde_json::Value>;

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Entries, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Entries::new());
        }
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                self.quarantine(&e)?;
                Ok(Entries::new())
            }
        }
    }

    /// Moves an unparsable file aside so the next write starts a fresh one.
    fn quarantine(&self, cause: &serde_json::Error) -> Result<(), StoreError> {
        let target = self.quarantine_path();
        warn!(
            path = %self.path.display(),
            moved_to = %target.display(),
            "store file is not a JSON object, moving it aside: {cause}"
        );
        match std::fs::rename(&self.path, &target) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// `<path>.corrupt`, next to the store file.
    pub fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Entries)) -> Result<(), StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Io("file store lock poisoned".into()))?;
        let mut entries = self.read_entries()?;
        apply(&mut entries);
        self.write_entries(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.read_entries()?;
        match entries.get(key) {
            None => Ok(None),
            Some(serde_json::Value::String(value)) => Ok(Some(value.clone())),
            Some(other) => Err(StoreError::Serialization(format!(
                "key {key} holds a non-string value: {other}"
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("k").expect("get"), None);
        store.set("k", "v1").expect("set");
        store.set("k", "v2").expect("overwrite");
        assert_eq!(store.get("k").expect("get"), Some("v2".to_string()));
        store.remove("k").expect("remove");
        store.remove("k").expect("remove missing");
        assert_eq!(store.get("k").expect("get"), None);
    }

    #[test]
    fn memory_store_get_set_remove() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn file_store_get_set_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        exercise(&FileStore::new(dir.path().join("nested").join("store.json")));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        FileStore::new(&path).set("session", "abc").expect("set");
        FileStore::new(&path).set("history", "[]").expect("set");

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("session").expect("get"), Some("abc".into()));
        assert_eq!(reopened.get("history").expect("get"), Some("[]".into()));
    }

    #[test]
    fn file_store_moves_corrupt_file_aside_and_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").expect("write");
        let store = FileStore::new(&path);

        assert_eq!(store.get("k").expect("get"), None);
        assert_eq!(
            std::fs::read_to_string(store.quarantine_path()).expect("quarantined"),
            "{not json"
        );

        store.set("k", "v").expect("set");
        assert_eq!(store.get("k").expect("get"), Some("v".into()));
    }

    #[test]
    fn file_store_rejects_non_string_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"k": 3}"#).expect("write");
        assert!(matches!(
            FileStore::new(&path).get("k"),
            Err(StoreError::Serialization(_))
        ));
    }
}
