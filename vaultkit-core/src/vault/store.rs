use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{EntryFields, VaultEntry};
use crate::backup::{BackupCodec, BackupEntry, BackupFile, ImportMode, ImportSummary};
use crate::config::VaultConfig;
use crate::crypto::{decrypt, derive_key, encrypt, EncryptedEnvelope, VaultKey, VaultSalt};
use crate::error::{VaultError, VaultResult};
use crate::rate_limit::{LimitDecision, RateLimiter};
use crate::storage::{Collection, KeyValueStore, StorageError, META_CHECK, META_SALT};
use crate::totp::{self, TotpToken};

const CHECK_MARKER: &str = "vaultkit:check:v1";

/// Canary sealed under the vault key so that a vault with no entries still
/// rejects a wrong password.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckRecord {
    marker: String,
    created_at: u64,
}

/// Lifecycle state of a [`VaultStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No salt has been persisted.
    Uninitialized,
    /// A salt exists but no key is held.
    Locked,
    /// The key and decrypted entries are held in memory.
    Unlocked,
}

/// Result of an unlock attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum UnlockOutcome {
    /// The vault is open.
    Unlocked {
        /// Number of entries decrypted.
        entries: usize,
    },
    /// Too many recent failures; nothing was attempted.
    RateLimited {
        /// Time until the next attempt is accepted.
        wait: Duration,
    },
}

/// Key material and plaintext that only exist while unlocked. Both wipe
/// themselves when the session is dropped.
struct Session {
    key: VaultKey,
    salt: VaultSalt,
    entries: HashMap<String, VaultEntry>,
}

/// The vault state machine: `Uninitialized -> Locked <-> Unlocked`.
///
/// Persistence goes through an injected [`KeyValueStore`] that only ever
/// sees envelopes and metadata. Every mutation persists before it updates
/// memory, so a storage failure leaves the in-memory view unchanged.
pub struct VaultStore {
    store: Arc<dyn KeyValueStore>,
    limiter: Arc<RateLimiter>,
    config: VaultConfig,
    session: Option<Session>,
}

impl fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultStore")
            .field("config", &self.config)
            .field("unlocked", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl VaultStore {
    /// Creates a store over `store`, throttled by the shared `limiter`.
    #[must_use]
    pub const fn new(
        store: Arc<dyn KeyValueStore>,
        limiter: Arc<RateLimiter>,
        config: VaultConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            config,
            session: None,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Whether the key is currently held.
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        self.session.is_some()
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the salt cannot be read.
    pub fn state(&self) -> VaultResult<VaultState> {
        if self.session.is_some() {
            return Ok(VaultState::Unlocked);
        }
        Ok(match self.load_salt()? {
            Some(_) => VaultState::Locked,
            None => VaultState::Uninitialized,
        })
    }

    /// Initializes a new vault protected by `password`.
    ///
    /// The store is left locked; call [`VaultStore::unlock`] next.
    ///
    /// # Errors
    ///
    /// - [`VaultError::AlreadyInitialized`] if a salt already exists.
    /// - [`VaultError::KeyDerivationFailed`] for an empty password.
    pub fn create(&mut self, password: &SecretString, now: u64) -> VaultResult<()> {
        if self.load_salt()?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        let salt = VaultSalt::generate();
        let key = derive_key(password, &salt, self.config.kdf_iterations)?;
        // the salt marks the vault initialized, so it goes last
        self.write_check(&key, now)?;
        self.store.put(Collection::Meta, META_SALT, &salt.to_base64())?;
        log::debug!("vault initialized");
        Ok(())
    }

    /// Derives the key and decrypts every persisted envelope.
    ///
    /// Attempts are throttled per `identity`. Unlocking is all-or-nothing:
    /// if the check record or any entry fails to open, nothing is kept and
    /// the failure is counted against `identity`. An attempt that gets past
    /// the throttle drops any session already held, so a failed re-unlock
    /// leaves the store locked.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InvalidPassword`] if any envelope fails to open.
    /// - [`VaultError::NotInitialized`] if no vault exists.
    /// - [`VaultError::KeyDerivationFailed`] for an empty password.
    pub fn unlock(
        &mut self,
        password: &SecretString,
        identity: &str,
        now: u64,
    ) -> VaultResult<UnlockOutcome> {
        if let LimitDecision::Locked { wait } = self.limiter.check_limit(identity, now)? {
            log::debug!("unlock refused for another {}s", wait.as_secs());
            return Ok(UnlockOutcome::RateLimited { wait });
        }
        self.lock();

        let salt = self.load_salt()?.ok_or(VaultError::NotInitialized)?;
        let key = derive_key(password, &salt, self.config.kdf_iterations)?;

        let entries = match self.open_all(&key) {
            Ok(entries) => entries,
            Err(VaultError::DecryptionFailed) => {
                let decision = self.limiter.record_failed_attempt(identity, now)?;
                log::warn!(
                    "unlock rejected, next attempt allowed: {}",
                    decision.is_allowed()
                );
                return Err(VaultError::InvalidPassword);
            }
            Err(err) => return Err(err),
        };

        self.limiter.record_successful_attempt(identity)?;
        let count = entries.len();
        self.session = Some(Session { key, salt, entries });
        log::debug!("vault unlocked with {count} entries");
        Ok(UnlockOutcome::Unlocked { entries: count })
    }

    /// Drops the key and every decrypted entry.
    pub fn lock(&mut self) {
        if self.session.take().is_some() {
            log::debug!("vault locked");
        }
    }

    /// All entries, oldest first (ties broken by id).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`] if the vault is locked.
    pub fn entries(&self) -> VaultResult<Vec<&VaultEntry>> {
        let session = self.session()?;
        let mut entries: Vec<&VaultEntry> = session.entries.values().collect();
        entries.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(entries)
    }

    /// One entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`] or [`VaultError::EntryNotFound`].
    pub fn entry(&self, id: &str) -> VaultResult<&VaultEntry> {
        self.session()?
            .entries
            .get(id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))
    }

    /// Validates, seals and persists a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`], a validation error, or the storage
    /// error that prevented the write.
    pub fn add_entry(&mut self, mut fields: EntryFields, now: u64) -> VaultResult<&VaultEntry> {
        let session = self.session.as_mut().ok_or(VaultError::Locked)?;
        fields.validate()?;

        let id = Uuid::new_v4().to_string();
        let entry = fields.into_entry(id.clone(), now, None);
        let envelope = encrypt(&session.key, &entry)?.to_json()?;
        self.store.put(Collection::Entries, &id, &envelope)?;

        log::debug!("entry added");
        Ok(&*session.entries.entry(id).or_insert(entry))
    }

    /// Replaces every editable field of entry `id`, keeping its id and
    /// creation time and stamping `updated_at = now`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`], [`VaultError::EntryNotFound`], a
    /// validation error, or the storage error that prevented the write.
    pub fn update_entry(
        &mut self,
        id: &str,
        mut fields: EntryFields,
        now: u64,
    ) -> VaultResult<&VaultEntry> {
        let session = self.session.as_mut().ok_or(VaultError::Locked)?;
        let created_at = session
            .entries
            .get(id)
            .map(|entry| entry.created_at)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
        fields.validate()?;

        let entry = fields.into_entry(id.to_string(), created_at, Some(now));
        let envelope = encrypt(&session.key, &entry)?.to_json()?;
        self.store.put(Collection::Entries, id, &envelope)?;

        let slot = session
            .entries
            .get_mut(id)
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))?;
        *slot = entry;
        log::debug!("entry updated");
        Ok(&*slot)
    }

    /// Deletes entry `id` from storage and memory.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Locked`], [`VaultError::EntryNotFound`], or
    /// the storage error that prevented the delete.
    pub fn delete_entry(&mut self, id: &str) -> VaultResult<()> {
        let session = self.session.as_mut().ok_or(VaultError::Locked)?;
        if !session.entries.contains_key(id) {
            return Err(VaultError::EntryNotFound(id.to_string()));
        }
        self.store.delete(Collection::Entries, id)?;
        session.entries.remove(id);
        log::debug!("entry deleted");
        Ok(())
    }

    /// Current TOTP code for entry `id` at `unix_time` (seconds).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidEntry`] if the entry has no secret, or
    /// the lookup error.
    pub fn totp_token(&self, id: &str, unix_time: u64) -> VaultResult<TotpToken> {
        let secret = Self::totp_secret(self.entry(id)?)?;
        Ok(totp::generate_token(secret, unix_time)?)
    }

    /// Checks `token` for entry `id`, accepting the configured skew.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidEntry`] if the entry has no secret, or
    /// the lookup error.
    pub fn verify_totp(&self, id: &str, token: &str, unix_time: u64) -> VaultResult<bool> {
        let secret = Self::totp_secret(self.entry(id)?)?;
        Ok(totp::verify_token_with_window(
            secret,
            token,
            unix_time,
            self.config.totp_skew_steps,
        )?)
    }

    /// Exports every persisted entry as a backup blob protected by
    /// `password`, which must be the vault password.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Locked`] if the vault is locked.
    /// - [`VaultError::InvalidPassword`] if `password` does not derive the
    ///   live key.
    pub fn export_backup(
        &self,
        password: &SecretString,
        device_fingerprint: &str,
        now: u64,
    ) -> VaultResult<String> {
        let session = self.session()?;
        let candidate = derive_key(password, &session.salt, self.config.kdf_iterations)?;
        if !candidate.ct_eq(&session.key) {
            return Err(VaultError::InvalidPassword);
        }

        let entries = self
            .store
            .to_array(Collection::Entries)?
            .into_iter()
            .map(|(id, encrypted)| BackupEntry { id, encrypted })
            .collect();
        self.codec()
            .export(password, &session.salt, entries, device_fingerprint, now)
    }

    /// Restores a backup blob.
    ///
    /// The blob is fully verified before anything is written. See
    /// [`ImportMode`] for how the contents are combined with the vault;
    /// an overwrite leaves the vault locked under the backup's salt.
    ///
    /// # Errors
    ///
    /// - [`VaultError::IncompatibleOrCorrupted`],
    ///   [`VaultError::InvalidBackupSignature`] or
    ///   [`VaultError::IntegrityCheckFailed`] if the blob is rejected.
    /// - [`VaultError::Locked`] when merging entries sealed under another
    ///   salt into a locked vault.
    pub fn import_backup(
        &mut self,
        blob: &str,
        password: &SecretString,
        mode: ImportMode,
        now: u64,
    ) -> VaultResult<ImportSummary> {
        let file = self.codec().open(blob, password)?;
        let backup_salt =
            VaultSalt::from_base64(&file.salt).map_err(|_| VaultError::IncompatibleOrCorrupted)?;

        let imported = match mode {
            ImportMode::Overwrite => self.overwrite(&file, &backup_salt, password, now)?,
            ImportMode::Merge => self.merge(&file, backup_salt, password, now)?,
        };
        log::debug!(
            "{mode} import wrote {imported} of {} entries",
            file.entries.len()
        );
        Ok(ImportSummary {
            total_entries: file.entries.len(),
            imported,
        })
    }

    fn overwrite(
        &mut self,
        file: &BackupFile,
        backup_salt: &VaultSalt,
        password: &SecretString,
        now: u64,
    ) -> VaultResult<usize> {
        let key = derive_key(password, backup_salt, self.config.kdf_iterations)?;
        // the live key stops matching storage as soon as the clear starts
        self.lock();

        self.store.clear(Collection::Entries)?;
        self.store.clear(Collection::Meta)?;
        self.store
            .put(Collection::Meta, META_SALT, &backup_salt.to_base64())?;

        let mut imported = 0;
        for item in &file.entries {
            match self.store.put(Collection::Entries, &item.id, &item.encrypted) {
                Ok(()) => imported += 1,
                Err(err) => log::warn!("skipping backup entry: {err}"),
            }
        }
        self.write_check(&key, now)?;
        Ok(imported)
    }

    fn merge(
        &mut self,
        file: &BackupFile,
        backup_salt: VaultSalt,
        password: &SecretString,
        now: u64,
    ) -> VaultResult<usize> {
        let vault_salt = if let Some(salt) = self.load_salt()? {
            salt
        } else {
            let key = derive_key(password, &backup_salt, self.config.kdf_iterations)?;
            self.write_check(&key, now)?;
            self.store
                .put(Collection::Meta, META_SALT, &backup_salt.to_base64())?;
            backup_salt
        };

        let source_key = if vault_salt == backup_salt {
            None
        } else if self.session.is_none() {
            return Err(VaultError::Locked);
        } else {
            Some(derive_key(password, &backup_salt, self.config.kdf_iterations)?)
        };

        let mut imported = 0;
        for item in &file.entries {
            if self.store.get(Collection::Entries, &item.id)?.is_some() {
                continue;
            }
            match self.merge_one(item, source_key.as_ref()) {
                Ok(()) => imported += 1,
                Err(err) => log::warn!("skipping backup entry: {err}"),
            }
        }
        Ok(imported)
    }

    /// Writes one backup entry, re-sealing it under the live key when it
    /// was sealed under a different salt.
    fn merge_one(&mut self, item: &BackupEntry, source_key: Option<&VaultKey>) -> VaultResult<()> {
        let (envelope, entry) = match (source_key, self.session.as_ref()) {
            (Some(source), Some(session)) => {
                let entry = open_entry(source, &item.id, &item.encrypted)?;
                let envelope = encrypt(&session.key, &entry)?.to_json()?;
                (envelope, Some(entry))
            }
            (None, Some(session)) => {
                let entry = open_entry(&session.key, &item.id, &item.encrypted)?;
                (item.encrypted.clone(), Some(entry))
            }
            (None, None) => (item.encrypted.clone(), None),
            (Some(_), None) => return Err(VaultError::Locked),
        };

        self.store.put(Collection::Entries, &item.id, &envelope)?;
        if let (Some(entry), Some(session)) = (entry, self.session.as_mut()) {
            session.entries.insert(item.id.clone(), entry);
        }
        Ok(())
    }

    fn session(&self) -> VaultResult<&Session> {
        self.session.as_ref().ok_or(VaultError::Locked)
    }

    const fn codec(&self) -> BackupCodec {
        BackupCodec::new(self.config.backup_iterations)
    }

    fn totp_secret(entry: &VaultEntry) -> VaultResult<&str> {
        entry
            .totp_secret
            .as_deref()
            .ok_or_else(|| VaultError::InvalidEntry("entry has no TOTP secret".to_string()))
    }

    fn load_salt(&self) -> VaultResult<Option<VaultSalt>> {
        self.store
            .get(Collection::Meta, META_SALT)?
            .map(|encoded| {
                VaultSalt::from_base64(&encoded).map_err(|err| {
                    VaultError::Storage(StorageError::CorruptedRow {
                        collection: Collection::Meta.name(),
                        reason: err.to_string(),
                    })
                })
            })
            .transpose()
    }

    fn write_check(&self, key: &VaultKey, now: u64) -> VaultResult<()> {
        let record = CheckRecord {
            marker: CHECK_MARKER.to_string(),
            created_at: now,
        };
        let envelope = encrypt(key, &record)?.to_json()?;
        self.store.put(Collection::Meta, META_CHECK, &envelope)?;
        Ok(())
    }

    /// Opens the check record, if any, and every entry. Any cryptographic
    /// failure is reported as [`VaultError::DecryptionFailed`].
    fn open_all(&self, key: &VaultKey) -> VaultResult<HashMap<String, VaultEntry>> {
        if let Some(check) = self.store.get(Collection::Meta, META_CHECK)? {
            let record: CheckRecord = decrypt(key, &EncryptedEnvelope::from_json(&check)?)?;
            if record.marker != CHECK_MARKER {
                return Err(VaultError::DecryptionFailed);
            }
        }

        let rows = self.store.to_array(Collection::Entries)?;
        let mut entries = HashMap::with_capacity(rows.len());
        for (id, envelope) in rows {
            let entry = open_entry(key, &id, &envelope)?;
            entries.insert(id, entry);
        }
        Ok(entries)
    }
}

/// Decrypts one persisted row. A record whose id does not match its row key
/// was moved between rows and is rejected like a failed tag, as is one that
/// breaks the entry invariants.
fn open_entry(key: &VaultKey, id: &str, envelope: &str) -> VaultResult<VaultEntry> {
    let entry: VaultEntry = decrypt(key, &EncryptedEnvelope::from_json(envelope)?)?;
    if entry.id != id {
        return Err(VaultError::DecryptionFailed);
    }
    if let Err(err) = entry.check() {
        log::warn!("rejecting malformed entry: {err}");
        return Err(VaultError::DecryptionFailed);
    }
    Ok(entry)
}
