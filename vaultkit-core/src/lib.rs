//! `VaultKit` is the core of a local, single-user password vault.
//!
//! Credential records are encrypted one by one with AES-256-GCM under a key
//! derived from a master password (PBKDF2-HMAC-SHA256) and handed to an
//! injected [`KeyValueStore`]. The crate also produces portable encrypted
//! backups, throttles unlock attempts and generates TOTP codes for stored
//! secrets.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use secrecy::SecretString;
//! use vaultkit_core::{
//!     EntryFields, MemoryStore, RateLimitPolicy, RateLimiter, UnlockOutcome, VaultConfig,
//!     VaultStore,
//! };
//!
//! # fn main() -> Result<(), vaultkit_core::VaultError> {
//! let config = VaultConfig { kdf_iterations: 1_000, ..VaultConfig::default() };
//! let limiter = Arc::new(RateLimiter::in_memory(RateLimitPolicy::default()));
//! let mut vault = VaultStore::new(Arc::new(MemoryStore::new()), limiter, config);
//!
//! let password = SecretString::from("correct horse".to_string());
//! vault.create(&password, 0)?;
//! assert!(matches!(
//!     vault.unlock(&password, "this-device", 0)?,
//!     UnlockOutcome::Unlocked { entries: 0 }
//! ));
//! vault.add_entry(EntryFields::new("email").with_username("ana"), 1_000)?;
//! assert_eq!(vault.entries()?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod crypto;
pub mod logger;
pub mod rate_limit;
pub mod storage;
pub mod totp;

mod config;
pub use config::VaultConfig;

mod error;
pub use error::{VaultError, VaultResult};

mod vault;
pub use vault::{EntryFields, UnlockOutcome, VaultEntry, VaultState, VaultStore};

pub use backup::{BackupCodec, BackupInfo, ImportMode, ImportSummary};
pub use crypto::{EncryptedEnvelope, VaultKey, VaultSalt};
pub use rate_limit::{client_fingerprint, LimitDecision, RateLimitPolicy, RateLimiter};
pub use storage::{Collection, KeyValueStore, MemoryStore, StorageError};
pub use totp::TotpToken;
