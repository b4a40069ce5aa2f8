//! Platform interface for vault persistence.

use super::error::StorageResult;

/// The two collections the vault persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// `id` -> serialized [`EncryptedEnvelope`](crate::EncryptedEnvelope).
    Entries,
    /// Vault metadata such as the salt.
    Meta,
}

impl Collection {
    /// Stable name of the collection, usable as a table or file name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Entries => "entries",
            Self::Meta => "meta",
        }
    }
}

/// Opaque keyed store holding encrypted rows.
///
/// The vault never hands plaintext to this interface: entry values are
/// envelope JSON and meta values are encoded salts or check envelopes.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, collection: Collection, key: &str) -> StorageResult<Option<String>>;

    /// Inserts or replaces the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes the value under `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, collection: Collection, key: &str) -> StorageResult<()>;

    /// Removes every row of the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the clear fails.
    fn clear(&self, collection: Collection) -> StorageResult<()>;

    /// Returns every `(key, value)` row of the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    fn to_array(&self, collection: Collection) -> StorageResult<Vec<(String, String)>>;
}
