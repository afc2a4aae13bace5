//! Record-store seam shared by the pattern cache and the healing queue
//!
//! Records are JSON documents addressed by `(namespace, key)` and carry a
//! `touched_at` timestamp that drives retention.

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{types::now, Error, Result};

/// A stored JSON document
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub value: Value,
    pub touched_at: i64,
    pub updated_at: i64,
}

impl StoredRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// Durable key-value collaborator
///
/// Implementations must make `increment` atomic per key and must keep
/// `delete_older_than` from exposing half-deleted state to readers.
pub trait RecordStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>>;

    /// Insert or overwrite a record
    fn put(&self, namespace: &str, key: &str, value: &Value, touched_at: i64) -> Result<()>;

    /// Atomically add one to an integer field, returning the new value
    fn increment(&self, namespace: &str, key: &str, field: &str) -> Result<i64>;

    /// Remove records whose `touched_at` is before `cutoff`
    fn delete_older_than(&self, namespace: &str, cutoff: i64) -> Result<usize>;

    fn list(&self, namespace: &str) -> Result<Vec<StoredRecord>>;
}

/// Fetch and decode a record
pub fn get_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    namespace: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(namespace, key)? {
        Some(record) => Ok(Some(record.decode()?)),
        None => Ok(None),
    }
}

/// Encode and store a record
pub fn put_as<T: Serialize>(
    store: &dyn RecordStore,
    namespace: &str,
    key: &str,
    value: &T,
    touched_at: i64,
) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.put(namespace, key, &value, touched_at)
}

/// Decode every record in a namespace
pub fn list_as<T: DeserializeOwned>(store: &dyn RecordStore, namespace: &str) -> Result<Vec<T>> {
    store
        .list(namespace)?
        .iter()
        .map(StoredRecord::decode)
        .collect()
}

// ============================================================================
// In-memory store
// ============================================================================

/// `DashMap`-backed store for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<(String, String), StoredRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
        Ok(self
            .records
            .get(&(namespace.to_string(), key.to_string()))
            .map(|r| r.value().clone()))
    }

    fn put(&self, namespace: &str, key: &str, value: &Value, touched_at: i64) -> Result<()> {
        self.records.insert(
            (namespace.to_string(), key.to_string()),
            StoredRecord {
                key: key.to_string(),
                value: value.clone(),
                touched_at,
                updated_at: now(),
            },
        );
        Ok(())
    }

    fn increment(&self, namespace: &str, key: &str, field: &str) -> Result<i64> {
        // The shard write lock is held for the whole read-modify-write.
        let mut entry = self
            .records
            .get_mut(&(namespace.to_string(), key.to_string()))
            .ok_or_else(|| Error::not_found(namespace, key))?;

        let record = entry.value_mut();
        let next = record.value.get(field).and_then(Value::as_i64).unwrap_or(0) + 1;
        match record.value.as_object_mut() {
            Some(obj) => {
                obj.insert(field.to_string(), Value::from(next));
            }
            None => {
                return Err(Error::StoreUnavailable(format!(
                    "record {}/{} is not an object",
                    namespace, key
                )))
            }
        }
        record.updated_at = now();
        Ok(next)
    }

    fn delete_older_than(&self, namespace: &str, cutoff: i64) -> Result<usize> {
        let before = self.records.len();
        self.records
            .retain(|(ns, _), record| ns != namespace || record.touched_at >= cutoff);
        let removed = before.saturating_sub(self.records.len());
        debug!("Removed {} record(s) from {} older than {}", removed, namespace, cutoff);
        Ok(removed)
    }

    fn list(&self, namespace: &str) -> Result<Vec<StoredRecord>> {
        let mut records: Vec<StoredRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.touched_at.cmp(&a.touched_at).then_with(|| a.key.cmp(&b.key)));
        Ok(records)
    }
}

/// Behaviour every `RecordStore` must share, run against each backend
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    pub fn crud(store: &dyn RecordStore) {
        assert!(store.get("ns", "a").unwrap().is_none());

        store.put("ns", "a", &json!({"n": 1}), 100).unwrap();
        store.put("other", "a", &json!({"n": 9}), 100).unwrap();

        let record = store.get("ns", "a").unwrap().unwrap();
        assert_eq!(record.value["n"], 1);
        assert_eq!(record.touched_at, 100);

        store.put("ns", "a", &json!({"n": 2}), 150).unwrap();
        assert_eq!(store.get("ns", "a").unwrap().unwrap().value["n"], 2);
        assert_eq!(store.list("ns").unwrap().len(), 1);
    }

    pub fn increment(store: &dyn RecordStore) {
        store.put("ns", "c", &json!({"hits": 0, "name": "x"}), 1).unwrap();
        assert_eq!(store.increment("ns", "c", "hits").unwrap(), 1);
        assert_eq!(store.increment("ns", "c", "hits").unwrap(), 2);
        assert_eq!(store.increment("ns", "c", "misses").unwrap(), 1);

        let record = store.get("ns", "c").unwrap().unwrap();
        assert_eq!(record.value["hits"], 2);
        assert_eq!(record.value["name"], "x");

        assert!(matches!(
            store.increment("ns", "missing", "hits"),
            Err(Error::NotFound { .. })
        ));
    }

    pub fn retention(store: &dyn RecordStore) {
        store.put("ns", "old", &json!({}), 10).unwrap();
        store.put("ns", "new", &json!({}), 1_000).unwrap();
        store.put("keep", "old", &json!({}), 10).unwrap();

        assert_eq!(store.delete_older_than("ns", 500).unwrap(), 1);
        assert!(store.get("ns", "old").unwrap().is_none());
        assert!(store.get("ns", "new").unwrap().is_some());
        assert!(store.get("keep", "old").unwrap().is_some());
    }

    pub fn concurrent_increments(store: Arc<dyn RecordStore>) {
        store.put("ns", "hot", &json!({"count": 0}), 1).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        store.increment("ns", "hot", "count").unwrap();
                    }
                });
            }
        });

        let record = store.get("ns", "hot").unwrap().unwrap();
        assert_eq!(record.value["count"], 400);
    }
}
