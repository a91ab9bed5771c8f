use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("storage quota exceeded ({needed} bytes needed, {quota} allowed)")]
    QuotaExceeded { needed: usize, quota: usize },
}

/// JSON document store keyed by string, mirrored in memory.
///
/// Reads never fail: a missing or malformed value yields the caller's
/// default. Writes go to disk synchronously; when the document outgrows the
/// configured quota the new value is kept in memory for the rest of the
/// session and the failure is reported through [`last_persist_error`]. Any
/// other write failure is returned and leaves memory as it was.
///
/// [`last_persist_error`]: KeyValueStore::last_persist_error
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    path: Option<PathBuf>,
    payload: Map<String, Value>,
    quota_bytes: Option<usize>,
    last_persist_error: Option<PersistError>,
}

impl KeyValueStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let payload = read_json_object(&path).unwrap_or_default();
        Self {
            path: Some(path),
            payload,
            quota_bytes: None,
            last_persist_error: None,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            payload: Map::new(),
            quota_bytes: None,
            last_persist_error: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_get(key) {
            Ok(value) => value.unwrap_or(default),
            Err(err) => {
                tracing::warn!(key, error = %format!("{err:#}"), "stored value unreadable; using default");
                default
            }
        }
    }

    /// Like [`get`](Self::get) but distinguishes a miss (`Ok(None)`) from a
    /// value that is present and does not parse.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let Some(value) = self.payload.get(key) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .with_context(|| format!("stored value for '{key}' is unreadable"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.payload.contains_key(key)
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        let snapshot = serde_json::to_value(value)?;
        if self.payload.get(key) == Some(&snapshot) {
            return Ok(());
        }
        let previous = self.payload.insert(key.to_string(), snapshot);
        if let Err(err) = self.flush() {
            match previous {
                Some(value) => self.payload.insert(key.to_string(), value),
                None => self.payload.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    /// Pushes `item` onto the list stored under `key`. A present value that
    /// does not parse as a list of `T` is left untouched and reported.
    pub fn append<T: Serialize + DeserializeOwned>(&mut self, key: &str, item: T) -> anyhow::Result<()> {
        let mut rows: Vec<T> = self.try_get(key)?.unwrap_or_default();
        rows.push(item);
        self.set(key, &rows)
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let Some(previous) = self.payload.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.flush() {
            self.payload.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    pub fn last_persist_error(&self) -> Option<&PersistError> {
        self.last_persist_error.as_ref()
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let document = serde_json::to_string_pretty(&Value::Object(self.payload.clone()))?;
        if let Some(quota) = self.quota_bytes {
            if document.len() > quota {
                let err = PersistError::QuotaExceeded {
                    needed: document.len(),
                    quota,
                };
                tracing::warn!(path = %path.display(), error = %err, "state kept in memory only");
                self.last_persist_error = Some(err);
                return Ok(());
            }
        }
        write_document(path, &document)?;
        self.last_persist_error = None;
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_document(path: &Path, document: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, document)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::{KeyValueStore, PersistError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn get_returns_default_on_miss() {
        let store = KeyValueStore::in_memory();
        assert_eq!(store.get("missing", 7u32), 7);
    }

    #[test]
    fn get_returns_default_on_malformed_value() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        std::fs::write(&path, r#"{"counter": "not-a-counter"}"#)?;
        let store = KeyValueStore::open(&path);
        assert_eq!(store.get("counter", Counter { hits: 3 }), Counter { hits: 3 });
        Ok(())
    }

    #[test]
    fn corrupt_file_opens_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{ this is not json")?;
        let store = KeyValueStore::open(&path);
        assert!(!store.contains("anything"));
        assert_eq!(store.get("anything", String::from("fallback")), "fallback");
        Ok(())
    }

    #[test]
    fn set_persists_across_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("state.json");
        let mut store = KeyValueStore::open(&path);
        store.set("counter", &Counter { hits: 2 })?;
        store.set("language", "es")?;

        let reopened = KeyValueStore::open(&path);
        assert_eq!(reopened.get("counter", Counter { hits: 0 }), Counter { hits: 2 });
        assert_eq!(reopened.get("language", String::new()), "es");
        Ok(())
    }

    #[test]
    fn last_write_wins_per_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let mut store = KeyValueStore::open(&path);
        store.set("key", &json!({"value": 1}))?;
        store.set("key", &json!({"value": 2}))?;
        assert_eq!(KeyValueStore::open(&path).get("key", json!(null)), json!({"value": 2}));
        Ok(())
    }

    #[test]
    fn quota_failure_keeps_value_in_memory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let mut store = KeyValueStore::open(&path).with_quota(Some(64));
        store.set("small", &1u8)?;
        assert!(store.last_persist_error().is_none());

        store.set("large", &"x".repeat(256))?;
        assert_eq!(store.get("large", String::new()).len(), 256);
        assert!(matches!(
            store.last_persist_error(),
            Some(PersistError::QuotaExceeded { quota: 64, .. })
        ));

        let reopened = KeyValueStore::open(&path);
        assert_eq!(reopened.get("small", 0u8), 1);
        assert!(!reopened.contains("large"));
        Ok(())
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let mut store = KeyValueStore::open(&path);
        store.set("balance", &30u64)?;

        std::fs::remove_file(&path)?;
        std::fs::create_dir(&path)?;
        assert!(store.set("balance", &20u64).is_err());
        assert_eq!(store.get("balance", 0u64), 30);
        assert!(store.set("fresh", &1u8).is_err());
        assert!(!store.contains("fresh"));
        assert!(store.remove("balance").is_err());
        assert_eq!(store.get("balance", 0u64), 30);
        Ok(())
    }

    #[test]
    fn append_refuses_to_overwrite_unreadable_list() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        std::fs::write(&path, r#"{"rows": [{"hits": 1}, {"hits": "bad"}]}"#)?;
        let mut store = KeyValueStore::open(&path);

        assert!(store.get("rows", Vec::<Counter>::new()).is_empty());
        assert!(store.try_get::<Vec<Counter>>("rows").is_err());
        assert!(store.append("rows", Counter { hits: 2 }).is_err());

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["rows"], json!([{"hits": 1}, {"hits": "bad"}]));

        store.append("fresh", Counter { hits: 3 })?;
        assert_eq!(store.get("fresh", Vec::<Counter>::new()), vec![Counter { hits: 3 }]);
        Ok(())
    }

    #[test]
    fn remove_drops_key_from_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let mut store = KeyValueStore::open(&path);
        store.set("projects", &vec![1, 2, 3])?;
        store.remove("projects")?;
        assert!(!KeyValueStore::open(&path).contains("projects"));
        Ok(())
    }
}
