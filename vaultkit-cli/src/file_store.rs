//! JSON files on disk backing the vault collections and unlock counters.
//!
//! Each collection lives in its own `<name>.json` object. Every write
//! rewrites the whole file through a temporary file and a rename, so a
//! crash leaves either the old or the new contents.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use vaultkit_core::rate_limit::{AttemptStore, RateLimitRecord};
use vaultkit_core::storage::StorageResult;
use vaultkit_core::{Collection, KeyValueStore, StorageError};

const ATTEMPTS_FILE: &str = "attempts.json";

fn io_error(context: String, err: &std::io::Error) -> StorageError {
    StorageError::Backend(format!("{context}: {err}"))
}

/// Directory of JSON files, serialized through one mutex.
#[derive(Debug)]
pub struct JsonDir {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonDir {
    /// Opens `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| io_error(format!("failed to create '{}'", root.display()), &e))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Directory holding the files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read<T: DeserializeOwned + Default>(&self, file: &str) -> StorageResult<T> {
        let path = self.root.join(file);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptedRow {
                collection: "file",
                reason: format!("'{}': {e}", path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(io_error(format!("failed to read '{}'", path.display()), &e)),
        }
    }

    fn write_atomic<T: Serialize>(&self, file: &str, value: &T) -> StorageResult<()> {
        let final_path = self.root.join(file);
        let temp_path = self.root.join(format!(".{file}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::Backend(format!("failed to encode '{file}': {e}")))?;

        let mut handle = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| io_error(format!("failed to create '{}'", temp_path.display()), &e))?;
        handle
            .write_all(&bytes)
            .and_then(|()| handle.sync_all())
            .map_err(|e| io_error(format!("failed to write '{}'", temp_path.display()), &e))?;
        drop(handle);

        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            io_error(
                format!(
                    "failed to rename '{}' to '{}'",
                    temp_path.display(),
                    final_path.display()
                ),
                &e,
            )
        })?;

        // make the rename durable where directories can be opened
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn update<T, R>(&self, file: &str, f: impl FnOnce(&mut T) -> R) -> StorageResult<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        let mut value: T = self.read(file)?;
        let result = f(&mut value);
        self.write_atomic(file, &value)?;
        Ok(result)
    }

    fn load_file<T: DeserializeOwned + Default>(&self, file: &str) -> StorageResult<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        self.read(file)
    }
}

fn collection_file(collection: Collection) -> String {
    format!("{}.json", collection.name())
}

type Rows = BTreeMap<String, String>;

impl KeyValueStore for JsonDir {
    fn get(&self, collection: Collection, key: &str) -> StorageResult<Option<String>> {
        let rows: Rows = self.load_file(&collection_file(collection))?;
        Ok(rows.get(key).cloned())
    }

    fn put(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()> {
        self.update(&collection_file(collection), |rows: &mut Rows| {
            rows.insert(key.to_string(), value.to_string());
        })
    }

    fn delete(&self, collection: Collection, key: &str) -> StorageResult<()> {
        self.update(&collection_file(collection), |rows: &mut Rows| {
            rows.remove(key);
        })
    }

    fn clear(&self, collection: Collection) -> StorageResult<()> {
        self.update(&collection_file(collection), Rows::clear)
    }

    fn to_array(&self, collection: Collection) -> StorageResult<Vec<(String, String)>> {
        let rows: Rows = self.load_file(&collection_file(collection))?;
        Ok(rows.into_iter().collect())
    }
}

impl AttemptStore for JsonDir {
    fn load(&self, identity: &str) -> StorageResult<Option<RateLimitRecord>> {
        let records: BTreeMap<String, RateLimitRecord> = self.load_file(ATTEMPTS_FILE)?;
        Ok(records.get(identity).copied())
    }

    fn save(&self, identity: &str, record: &RateLimitRecord) -> StorageResult<()> {
        self.update(
            ATTEMPTS_FILE,
            |records: &mut BTreeMap<String, RateLimitRecord>| {
                records.insert(identity.to_string(), *record);
            },
        )
    }

    fn remove(&self, identity: &str) -> StorageResult<()> {
        self.update(
            ATTEMPTS_FILE,
            |records: &mut BTreeMap<String, RateLimitRecord>| {
                records.remove(identity);
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = JsonDir::open(dir.path()).expect("open");
            store.put(Collection::Entries, "b", "2").expect("put");
            store.put(Collection::Entries, "a", "1").expect("put");
            store.put(Collection::Meta, "salt", "c2FsdA==").expect("put");
        }

        let store = JsonDir::open(dir.path()).expect("reopen");
        assert_eq!(
            store.to_array(Collection::Entries).expect("rows"),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert_eq!(
            store.get(Collection::Meta, "salt").expect("get").as_deref(),
            Some("c2FsdA==")
        );
        assert!(!dir.path().join(".entries.json.tmp").exists());
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDir::open(dir.path()).expect("open");
        store.put(Collection::Entries, "a", "1").expect("put");
        store.put(Collection::Entries, "b", "2").expect("put");

        store.delete(Collection::Entries, "a").expect("delete");
        store.delete(Collection::Entries, "missing").expect("delete");
        assert_eq!(store.to_array(Collection::Entries).expect("rows").len(), 1);

        store.clear(Collection::Entries).expect("clear");
        assert!(store.to_array(Collection::Entries).expect("rows").is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("meta.json"), b"{not json").expect("write");
        let store = JsonDir::open(dir.path()).expect("open");
        assert!(matches!(
            store.get(Collection::Meta, "salt"),
            Err(StorageError::CorruptedRow { .. })
        ));
    }

    #[test]
    fn test_attempt_records_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDir::open(dir.path()).expect("open");
        let record = RateLimitRecord {
            count: 3,
            last_attempt_at: 1_000,
            lockout_until: 0,
        };
        AttemptStore::save(&store, "me", &record).expect("save");
        assert_eq!(AttemptStore::load(&store, "me").expect("load"), Some(record));
        AttemptStore::remove(&store, "me").expect("remove");
        assert_eq!(AttemptStore::load(&store, "me").expect("load"), None);
    }
}
