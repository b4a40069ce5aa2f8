use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::format::{
    BackupEntry, BackupFile, BackupInfo, BackupMetadata, FingerprintProbe, SignatureProbe,
    BACKUP_SIGNATURE, BACKUP_VERSION,
};
use crate::crypto::cipher::{self, TAG_LEN};
use crate::crypto::kdf::derive_raw;
use crate::crypto::{VaultKey, VaultSalt, IV_LEN, KEY_LEN};
use crate::error::{VaultError, VaultResult};

/// Fixed PBKDF2 salt for the backup master key. Backups are portable
/// across vaults, so the key cannot depend on the vault salt.
const BACKUP_KDF_SALT: &[u8] = b"vaultkit/backup/kdf-salt/v1";

const INFO_ENCRYPTION: &[u8] = b"vaultkit/backup/encryption/v1";
const INFO_CHECKSUM: &[u8] = b"vaultkit/backup/checksum/v1";
const INFO_FINGERPRINT: &[u8] = b"vaultkit/backup/fingerprint/v1";

const FINGERPRINT_MESSAGE: &[u8] = b"vaultkit-backup-key-check";

type HmacSha256 = Hmac<Sha256>;

/// Subkeys expanded from one backup password.
#[derive(Zeroize, ZeroizeOnDrop)]
struct BackupKeys {
    encryption: [u8; KEY_LEN],
    checksum: [u8; KEY_LEN],
    fingerprint: [u8; KEY_LEN],
}

impl BackupKeys {
    fn derive(password: &SecretString, iterations: u32) -> VaultResult<Self> {
        let master = derive_raw(
            password.expose_secret().as_bytes(),
            BACKUP_KDF_SALT,
            iterations,
        )?;
        let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());

        let mut keys = Self {
            encryption: [0u8; KEY_LEN],
            checksum: [0u8; KEY_LEN],
            fingerprint: [0u8; KEY_LEN],
        };
        for (info, out) in [
            (INFO_ENCRYPTION, &mut keys.encryption),
            (INFO_CHECKSUM, &mut keys.checksum),
            (INFO_FINGERPRINT, &mut keys.fingerprint),
        ] {
            hkdf.expand(info, out)
                .map_err(|err| VaultError::KeyDerivationFailed(err.to_string()))?;
        }
        Ok(keys)
    }

    const fn encryption_key(&self) -> VaultKey {
        VaultKey::from_bytes(self.encryption)
    }

    fn mac(key: &[u8; KEY_LEN]) -> VaultResult<HmacSha256> {
        HmacSha256::new_from_slice(key)
            .map_err(|err| VaultError::KeyDerivationFailed(err.to_string()))
    }

    fn checksum(&self, body: &[u8]) -> VaultResult<String> {
        let mut mac = Self::mac(&self.checksum)?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn key_fingerprint(&self) -> VaultResult<String> {
        let mut mac = Self::mac(&self.fingerprint)?;
        mac.update(FINGERPRINT_MESSAGE);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify_checksum(&self, body: &[u8], expected_hex: &str) -> bool {
        let Ok(expected) = hex::decode(expected_hex) else {
            return false;
        };
        Self::mac(&self.checksum).is_ok_and(|mut mac| {
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        })
    }

    fn verify_fingerprint(&self, expected_hex: &str) -> bool {
        self.key_fingerprint()
            .is_ok_and(|actual| bool::from(actual.as_bytes().ct_eq(expected_hex.as_bytes())))
    }
}

/// Produces and opens portable, password-protected backup blobs.
///
/// Entries travel as their persisted envelopes, so a backup never holds
/// plaintext records even after the outer layer is removed. The outer layer
/// is AES-256-GCM under a key derived from the backup password alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupCodec {
    iterations: u32,
}

impl BackupCodec {
    /// Creates a codec running PBKDF2 with `iterations` rounds. Both sides
    /// of a transfer must agree on the count.
    #[must_use]
    pub const fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Builds the base64 backup blob for `entries` sealed under `salt`.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation, serialization or encryption
    /// fails.
    pub fn export(
        &self,
        password: &SecretString,
        salt: &VaultSalt,
        entries: Vec<BackupEntry>,
        device_fingerprint: &str,
        created_at: u64,
    ) -> VaultResult<String> {
        let keys = BackupKeys::derive(password, self.iterations)?;
        let mut file = BackupFile {
            version: BACKUP_VERSION,
            created_at,
            salt: salt.to_base64(),
            metadata: BackupMetadata {
                total_entries: u64::try_from(entries.len()).unwrap_or(u64::MAX),
                device_fingerprint: device_fingerprint.to_string(),
            },
            entries,
            signature: BACKUP_SIGNATURE.to_string(),
            checksum: String::new(),
            key_fingerprint: keys.key_fingerprint()?,
        };
        file.checksum = keys.checksum(&file.canonical_body()?)?;
        log::debug!("exporting backup with {} entries", file.entries.len());
        seal_document(&keys, &file)
    }

    /// Decrypts and verifies a backup blob without touching any store.
    ///
    /// Checks run in a fixed order and all complete before anything is
    /// returned: outer decryption, signature, checksum, key fingerprint.
    ///
    /// # Errors
    ///
    /// - [`VaultError::IncompatibleOrCorrupted`] if the blob cannot be
    ///   decoded or decrypted with `password`.
    /// - [`VaultError::InvalidBackupSignature`] if the format marker is
    ///   missing or unknown.
    /// - [`VaultError::IntegrityCheckFailed`] if the checksum or key
    ///   fingerprint does not match.
    pub fn open(&self, blob: &str, password: &SecretString) -> VaultResult<BackupFile> {
        let keys = BackupKeys::derive(password, self.iterations)?;
        let plaintext = decrypt_blob(&keys, blob)?;

        let probe: SignatureProbe =
            serde_json::from_slice(&plaintext).map_err(|_| VaultError::IncompatibleOrCorrupted)?;
        if probe.signature.as_deref() != Some(BACKUP_SIGNATURE) {
            return Err(VaultError::InvalidBackupSignature);
        }

        let file: BackupFile =
            serde_json::from_slice(&plaintext).map_err(|_| VaultError::IncompatibleOrCorrupted)?;
        if file.version != BACKUP_VERSION {
            return Err(VaultError::IncompatibleOrCorrupted);
        }
        if !keys.verify_checksum(&file.canonical_body()?, &file.checksum) {
            return Err(VaultError::IntegrityCheckFailed);
        }
        if !keys.verify_fingerprint(&file.key_fingerprint) {
            return Err(VaultError::IntegrityCheckFailed);
        }
        Ok(file)
    }

    /// Whether `password` opens `blob`, without returning its contents.
    ///
    /// # Errors
    ///
    /// Returns an error only if key derivation itself fails. A damaged
    /// blob simply yields `false`.
    pub fn verify_password(&self, blob: &str, password: &SecretString) -> VaultResult<bool> {
        let keys = BackupKeys::derive(password, self.iterations)?;
        let Ok(plaintext) = decrypt_blob(&keys, blob) else {
            return Ok(false);
        };
        Ok(serde_json::from_slice::<FingerprintProbe>(&plaintext)
            .is_ok_and(|probe| keys.verify_fingerprint(&probe.key_fingerprint)))
    }

    /// Reads the backup metadata after full verification.
    ///
    /// # Errors
    ///
    /// Same as [`BackupCodec::open`].
    pub fn inspect(&self, blob: &str, password: &SecretString) -> VaultResult<BackupInfo> {
        self.open(blob, password).map(|file| BackupInfo::from(&file))
    }
}

#[cfg(test)]
impl BackupCodec {
    /// Seals `file` exactly as given, leaving its checksum and signature
    /// untouched.
    pub(crate) fn seal_as_is(
        &self,
        password: &SecretString,
        file: &BackupFile,
    ) -> VaultResult<String> {
        let keys = BackupKeys::derive(password, self.iterations)?;
        seal_document(&keys, file)
    }
}

fn seal_document(keys: &BackupKeys, file: &BackupFile) -> VaultResult<String> {
    let plaintext = Zeroizing::new(serde_json::to_vec(file)?);
    let (iv, ciphertext) = cipher::seal(&keys.encryption_key(), &plaintext)?;
    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

fn decrypt_blob(keys: &BackupKeys, blob: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
    let compact: String = blob.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|_| VaultError::IncompatibleOrCorrupted)?;
    if bytes.len() < IV_LEN + TAG_LEN {
        return Err(VaultError::IncompatibleOrCorrupted);
    }
    let (iv, ciphertext) = bytes.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv
        .try_into()
        .map_err(|_| VaultError::IncompatibleOrCorrupted)?;
    cipher::open(&keys.encryption_key(), &iv, ciphertext)
        .map_err(|_| VaultError::IncompatibleOrCorrupted)
}
