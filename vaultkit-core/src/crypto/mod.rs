//! Key derivation and record encryption.

pub mod cipher;
pub mod kdf;

pub use cipher::{decrypt, encrypt, EncryptedEnvelope, ENVELOPE_VERSION, IV_LEN};
pub use kdf::{derive_key, VaultKey, VaultSalt, DEFAULT_KDF_ITERATIONS, KEY_LEN, SALT_LEN};
