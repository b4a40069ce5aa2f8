//! Password-based key derivation.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::Hmac;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

/// Length of the vault salt in bytes.
pub const SALT_LEN: usize = 16;

/// Length of derived keys in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count used when nothing else is configured.
pub const DEFAULT_KDF_ITERATIONS: u32 = 200_000;

/// Symmetric key derived from the master password (256-bit).
///
/// # Security
///
/// - The key is zeroized on drop.
/// - The key should never be logged or serialized in plaintext.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; KEY_LEN]);

impl VaultKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Constant-time equality.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Random per-vault salt. Generated once at vault creation and never
/// regenerated; a new salt would orphan every existing envelope.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VaultSalt([u8; SALT_LEN]);

impl VaultSalt {
    /// Generates a fresh salt from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps existing salt bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw salt bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    /// Standard base64 form, as persisted in meta storage and backups.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parses the base64 form.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyDerivationFailed`] if the value is not
    /// base64 or does not decode to exactly 16 bytes.
    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|err| VaultError::KeyDerivationFailed(format!("salt is not base64: {err}")))?;
        let bytes: [u8; SALT_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            VaultError::KeyDerivationFailed(format!(
                "salt length mismatch: expected {SALT_LEN}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for VaultSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VaultSalt").field(&self.to_base64()).finish()
    }
}

/// Derives the vault key from the master password and vault salt with
/// PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same `(password, salt, iterations)` always yields the
/// same key, which is what lets `unlock` re-open envelopes every session.
///
/// # Errors
///
/// Returns [`VaultError::KeyDerivationFailed`] for an empty password or a
/// zero iteration count. This is never a "wrong password" signal.
pub fn derive_key(
    password: &SecretString,
    salt: &VaultSalt,
    iterations: u32,
) -> VaultResult<VaultKey> {
    derive_raw(password.expose_secret().as_bytes(), salt.as_bytes(), iterations)
}

/// PBKDF2 over an arbitrary salt. Used for keys bound to fixed contexts
/// rather than the vault salt.
pub(crate) fn derive_raw(password: &[u8], salt: &[u8], iterations: u32) -> VaultResult<VaultKey> {
    if password.is_empty() {
        return Err(VaultError::KeyDerivationFailed(
            "password must not be empty".to_string(),
        ));
    }
    if iterations == 0 {
        return Err(VaultError::KeyDerivationFailed(
            "iteration count must be positive".to_string(),
        ));
    }

    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
        .map_err(|err| VaultError::KeyDerivationFailed(err.to_string()))?;
    let key = VaultKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_rfc7914_pbkdf2_sha256_vector() {
        // RFC 7914 section 11: P = "passwd", S = "salt", c = 1, dkLen = 64 (first 32 bytes)
        let key = derive_raw(b"passwd", b"salt", 1).expect("derive");
        assert_eq!(
            hex::encode(key.as_bytes()),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let salt = VaultSalt::generate();
        let first = derive_key(&secret("hunter2"), &salt, 1_000).expect("derive");
        let second = derive_key(&secret("hunter2"), &salt, 1_000).expect("derive");
        assert!(first.ct_eq(&second));

        let other_salt = derive_key(&secret("hunter2"), &VaultSalt::generate(), 1_000)
            .expect("derive");
        assert!(!first.ct_eq(&other_salt));
        let other_password = derive_key(&secret("hunter3"), &salt, 1_000).expect("derive");
        assert!(!first.ct_eq(&other_password));
    }

    #[test]
    fn test_rejects_degenerate_parameters() {
        let salt = VaultSalt::generate();
        assert!(matches!(
            derive_key(&secret(""), &salt, 1_000),
            Err(VaultError::KeyDerivationFailed(_))
        ));
        assert!(matches!(
            derive_key(&secret("pw"), &salt, 0),
            Err(VaultError::KeyDerivationFailed(_))
        ));
    }

    #[test]
    fn test_salt_base64_round_trip_and_length_check() {
        let salt = VaultSalt::generate();
        let decoded = VaultSalt::from_base64(&salt.to_base64()).expect("decode");
        assert_eq!(decoded, salt);

        let short = BASE64.encode([0u8; 8]);
        assert!(matches!(
            VaultSalt::from_base64(&short),
            Err(VaultError::KeyDerivationFailed(_))
        ));
        assert!(VaultSalt::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = VaultKey::from_bytes([7u8; KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains('7'));
    }
}
