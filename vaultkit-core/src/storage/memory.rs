//! In-memory implementation of [`KeyValueStore`].
//!
//! Useful for tests and for hosts that persist the collections themselves
//! by snapshotting [`KeyValueStore::to_array`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::error::{StorageError, StorageResult};
use super::traits::{Collection, KeyValueStore};

/// Mutex-guarded map per collection. Rows come back in key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> R,
    ) -> StorageResult<R> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        Ok(f(guard.entry(collection).or_default()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, collection: Collection, key: &str) -> StorageResult<Option<String>> {
        self.with(collection, |rows| rows.get(key).cloned())
    }

    fn put(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()> {
        self.with(collection, |rows| {
            rows.insert(key.to_string(), value.to_string());
        })
    }

    fn delete(&self, collection: Collection, key: &str) -> StorageResult<()> {
        self.with(collection, |rows| {
            rows.remove(key);
        })
    }

    fn clear(&self, collection: Collection) -> StorageResult<()> {
        self.with(collection, BTreeMap::clear)
    }

    fn to_array(&self, collection: Collection) -> StorageResult<Vec<(String, String)>> {
        self.with(collection, |rows| {
            rows.iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collections_are_independent() {
        let store = MemoryStore::new();
        store.put(Collection::Entries, "a", "1").expect("put");
        store.put(Collection::Meta, "a", "2").expect("put");

        assert_eq!(
            store.get(Collection::Entries, "a").expect("get"),
            Some("1".to_string())
        );
        store.clear(Collection::Entries).expect("clear");
        assert!(store.get(Collection::Entries, "a").expect("get").is_none());
        assert_eq!(
            store.get(Collection::Meta, "a").expect("get"),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_to_array_is_key_ordered() {
        let store = MemoryStore::new();
        store.put(Collection::Entries, "b", "2").expect("put");
        store.put(Collection::Entries, "a", "1").expect("put");
        store.delete(Collection::Entries, "missing").expect("delete");

        let rows = store.to_array(Collection::Entries).expect("rows");
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }
}
