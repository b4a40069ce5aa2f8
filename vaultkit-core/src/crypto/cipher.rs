//! AES-256-GCM sealing of individual records.
//!
//! Every call to [`encrypt`] draws a fresh 12-byte IV from the OS RNG. IV
//! reuse under one key breaks both confidentiality and authenticity of GCM,
//! so IVs are never derived, counted or cached.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use super::kdf::VaultKey;
use crate::error::{VaultError, VaultResult};

/// AES-GCM IV size in bytes.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_LEN: usize = 16;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Encrypted-at-rest representation of one record.
///
/// Wire shape: `{"version":1,"iv":"<base64>","cipher":"<base64>"}` where
/// `cipher` carries the ciphertext followed by the GCM tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Envelope format version.
    pub version: u32,
    /// Base64 IV.
    pub iv: String,
    /// Base64 ciphertext with appended tag.
    pub cipher: String,
}

impl EncryptedEnvelope {
    /// Serializes the envelope to the JSON string persisted per entry.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> VaultResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a persisted envelope. Malformed input is a decryption failure.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] if the JSON is malformed.
    pub fn from_json(json: &str) -> VaultResult<Self> {
        serde_json::from_str(json).map_err(|_| VaultError::DecryptionFailed)
    }
}

/// Encrypts raw bytes under `key` with a fresh IV.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the AEAD refuses the input.
pub fn seal(key: &VaultKey, plaintext: &[u8]) -> VaultResult<([u8; IV_LEN], Vec<u8>)> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| VaultError::EncryptionFailed("AES-256-GCM encryption failed".to_string()))?;
    Ok((iv, ciphertext))
}

/// Decrypts bytes produced by [`seal`], verifying the tag.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] on any authentication failure.
pub fn open(key: &VaultKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::DecryptionFailed)
}

/// Serializes `record` to JSON and seals it into an envelope.
///
/// # Errors
///
/// Returns an error if serialization or encryption fails.
pub fn encrypt<T: Serialize>(key: &VaultKey, record: &T) -> VaultResult<EncryptedEnvelope> {
    let plaintext = Zeroizing::new(serde_json::to_vec(record)?);
    let (iv, ciphertext) = seal(key, &plaintext)?;
    Ok(EncryptedEnvelope {
        version: ENVELOPE_VERSION,
        iv: BASE64.encode(iv),
        cipher: BASE64.encode(ciphertext),
    })
}

/// Opens an envelope and parses the record.
///
/// Tag mismatch, bad encoding, unknown version and JSON decode errors all
/// collapse into [`VaultError::DecryptionFailed`]; no partial output is
/// ever returned.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] on any failure.
pub fn decrypt<T: DeserializeOwned>(key: &VaultKey, envelope: &EncryptedEnvelope) -> VaultResult<T> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(VaultError::DecryptionFailed);
    }
    let iv: [u8; IV_LEN] = BASE64
        .decode(&envelope.iv)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(VaultError::DecryptionFailed)?;
    let ciphertext = BASE64
        .decode(&envelope.cipher)
        .map_err(|_| VaultError::DecryptionFailed)?;
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    let plaintext = open(key, &iv, &ciphertext)?;
    serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    const fn key(byte: u8) -> VaultKey {
        VaultKey::from_bytes([byte; 32])
    }

    fn flip_bit(encoded: &str, bit: usize) -> String {
        let mut bytes = BASE64.decode(encoded).expect("base64");
        bytes[bit / 8] ^= 1 << (bit % 8);
        BASE64.encode(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let record = json!({"title": "mail", "password": "s3cret", "codes": ["A1", "B2"]});
        let envelope = encrypt(&key(1), &record).expect("encrypt");
        assert_eq!(envelope.version, ENVELOPE_VERSION);

        let decoded: serde_json::Value = decrypt(&key(1), &envelope).expect("decrypt");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_ivs_are_unique_per_call() {
        let key = key(2);
        let ivs: HashSet<String> = (0..2_000)
            .map(|_| encrypt(&key, &"same plaintext").expect("encrypt").iv)
            .collect();
        assert_eq!(ivs.len(), 2_000);
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let envelope = encrypt(&key(3), &"secret").expect("encrypt");
        let result: VaultResult<String> = decrypt(&key(4), &envelope);
        assert!(matches!(result, Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let key = key(5);
        let envelope = encrypt(&key, &"tamper me").expect("encrypt");
        let cipher_bits = BASE64.decode(&envelope.cipher).expect("base64").len() * 8;

        for bit in 0..cipher_bits {
            let tampered = EncryptedEnvelope {
                cipher: flip_bit(&envelope.cipher, bit),
                ..envelope.clone()
            };
            let result: VaultResult<String> = decrypt(&key, &tampered);
            assert!(result.is_err(), "cipher bit {bit} flip went undetected");
        }
        for bit in 0..IV_LEN * 8 {
            let tampered = EncryptedEnvelope {
                iv: flip_bit(&envelope.iv, bit),
                ..envelope.clone()
            };
            let result: VaultResult<String> = decrypt(&key, &tampered);
            assert!(result.is_err(), "iv bit {bit} flip went undetected");
        }
    }

    #[test]
    fn test_malformed_envelopes_are_decryption_failures() {
        let key = key(6);
        let good = encrypt(&key, &"x").expect("encrypt");

        let cases = [
            EncryptedEnvelope { version: 2, ..good.clone() },
            EncryptedEnvelope { iv: "%%%".to_string(), ..good.clone() },
            EncryptedEnvelope { iv: BASE64.encode([0u8; 8]), ..good.clone() },
            EncryptedEnvelope { cipher: BASE64.encode([0u8; 4]), ..good.clone() },
        ];
        for envelope in &cases {
            let result: VaultResult<String> = decrypt(&key, envelope);
            assert!(matches!(result, Err(VaultError::DecryptionFailed)));
        }
        assert!(matches!(
            EncryptedEnvelope::from_json("{\"version\":1}"),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_type_mismatch_is_decryption_failure() {
        let key = key(7);
        let envelope = encrypt(&key, &"a string").expect("encrypt");
        let result: VaultResult<Vec<u32>> = decrypt(&key, &envelope);
        assert!(matches!(result, Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = encrypt(&key(8), &1u8).expect("encrypt");
        let json = envelope.to_json().expect("json");
        assert!(json.starts_with("{\"version\":1,\"iv\":\""));
        assert_eq!(EncryptedEnvelope::from_json(&json).expect("parse"), envelope);
    }
}
