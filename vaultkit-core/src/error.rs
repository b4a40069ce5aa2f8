use thiserror::Error;

use crate::storage::StorageError;
use crate::totp::TotpError;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Error outputs from `VaultKit`.
///
/// Cryptographic failures never carry plaintext and never say which record
/// failed; callers at the unlock boundary only ever see [`VaultError::InvalidPassword`].
#[derive(Debug, Error)]
pub enum VaultError {
    /// Key derivation could not run (bad parameters or primitive failure).
    /// Never means "wrong password".
    #[error("unable to derive key: {0}")]
    KeyDerivationFailed(String),

    /// An envelope failed authentication or could not be decoded.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Encryption of a record failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The password does not open this vault.
    #[error("invalid password or corrupted vault")]
    InvalidPassword,

    /// The backup could not be decrypted with the supplied password.
    #[error("backup is incompatible or corrupted")]
    IncompatibleOrCorrupted,

    /// The backup signature marker is missing or unknown.
    #[error("invalid backup signature")]
    InvalidBackupSignature,

    /// The backup checksum does not match its contents.
    #[error("backup integrity check failed")]
    IntegrityCheckFailed,

    /// A TOTP secret is malformed.
    #[error("invalid TOTP secret: {0}")]
    InvalidTotpSecret(#[from] TotpError),

    /// A record failed validation at the serialization boundary.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// No entry with the given id exists.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The operation needs an unlocked vault.
    #[error("vault is locked")]
    Locked,

    /// No vault salt has been persisted yet.
    #[error("vault not initialized")]
    NotInitialized,

    /// A vault salt already exists.
    #[error("vault already initialized")]
    AlreadyInitialized,

    /// Unexpected error serializing information.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The key-value collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
