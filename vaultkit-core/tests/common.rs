//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use secrecy::SecretString;
use vaultkit_core::storage::{StorageResult, META_CHECK};
use vaultkit_core::{
    Collection, EntryFields, KeyValueStore, MemoryStore, RateLimitPolicy, RateLimiter,
    StorageError, UnlockOutcome, VaultConfig, VaultStore,
};

pub const MASTER: &str = "correct horse battery staple";
pub const DEVICE: &str = "integration-device";

/// Low iteration counts keep PBKDF2 from dominating test time.
pub fn fast_config() -> VaultConfig {
    VaultConfig {
        kdf_iterations: 1_000,
        backup_iterations: 1_000,
        ..VaultConfig::default()
    }
}

pub fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

pub fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::in_memory(RateLimitPolicy::default()))
}

pub fn vault_over(store: Arc<dyn KeyValueStore>) -> VaultStore {
    VaultStore::new(store, limiter(), fast_config())
}

/// A created and unlocked vault over a fresh in-memory store.
pub fn unlocked_vault() -> (VaultStore, Arc<MemoryStore>) {
    let backing = Arc::new(MemoryStore::new());
    let mut vault = vault_over(backing.clone());
    vault.create(&password(MASTER), 0).expect("create");
    let outcome = vault.unlock(&password(MASTER), DEVICE, 0).expect("unlock");
    assert_eq!(outcome, UnlockOutcome::Unlocked { entries: 0 });
    (vault, backing)
}

pub fn sample_fields() -> Vec<EntryFields> {
    vec![
        EntryFields::new("Email")
            .with_username("ana@example.com")
            .with_password("hunter2")
            .with_url("https://mail.example.com"),
        EntryFields::new("Bank")
            .with_username("ana")
            .with_password("s3cr3t!")
            .with_notes("security question: blue")
            .with_backup_codes(vec!["ABC123".to_string(), "XYZ789".to_string()]),
        EntryFields::new("GitHub")
            .with_username("ana-dev")
            .with_totp_secret("JBSWY3DPEHPK3PXP JBSWY3DPEHPK3PXP"),
    ]
}

/// Adds every sample entry and returns their ids in insertion order.
pub fn populate(vault: &mut VaultStore) -> Vec<String> {
    sample_fields()
        .into_iter()
        .enumerate()
        .map(|(i, fields)| {
            vault
                .add_entry(fields, 1_000 * (i as u64 + 1))
                .expect("add")
                .id
                .clone()
        })
        .collect()
}

/// Wraps a [`MemoryStore`] and fails every write while the switch is on.
/// A second switch fails only writes of the password check record.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_check_writes: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_check(&self, failing: bool) {
        self.fail_check_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, collection: Collection, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(collection, key)
    }

    fn put(&self, collection: Collection, key: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        if collection == Collection::Meta
            && key == META_CHECK
            && self.fail_check_writes.load(Ordering::SeqCst)
        {
            return Err(StorageError::Backend("check write refused".to_string()));
        }
        self.inner.put(collection, key, value)
    }

    fn delete(&self, collection: Collection, key: &str) -> StorageResult<()> {
        self.check()?;
        self.inner.delete(collection, key)
    }

    fn clear(&self, collection: Collection) -> StorageResult<()> {
        self.check()?;
        self.inner.clear(collection)
    }

    fn to_array(&self, collection: Collection) -> StorageResult<Vec<(String, String)>> {
        self.inner.to_array(collection)
    }
}
