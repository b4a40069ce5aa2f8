//! Backup file structure and its canonical checksum input.
//!
//! # Layout
//!
//! ```text
//! blob      = base64( iv[12] || AES-256-GCM(export_key, json(BackupFile)) )
//! BackupFile = {
//!     version, createdAt, salt, entries: [{id, encrypted}],
//!     metadata: {totalEntries, deviceFingerprint},
//!     signature, checksum, keyFingerprint
//! }
//! checksum  = hex( HMAC-SHA256(checksum_key, json({version, createdAt, salt, entries, metadata})) )
//! ```
//!
//! `entries[].encrypted` is the envelope JSON exactly as persisted, still
//! sealed under the vault key.

use serde::{Deserialize, Serialize};

use crate::error::VaultResult;

/// Marker identifying the format and its major version.
pub const BACKUP_SIGNATURE: &str = "VAULTKIT_BACKUP_V1";

/// Current backup body version.
pub const BACKUP_VERSION: u32 = 1;

/// Conventional file extension for backup blobs.
pub const BACKUP_FILE_EXTENSION: &str = "vaultbackup";

/// One persisted entry, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Entry id.
    pub id: String,
    /// Envelope JSON as persisted.
    pub encrypted: String,
}

/// Descriptive metadata stored alongside the entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Number of entries in the backup.
    pub total_entries: u64,
    /// Coarse identity of the exporting client.
    pub device_fingerprint: String,
}

/// Decrypted backup document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    /// Body version.
    pub version: u32,
    /// Export time, Unix ms.
    pub created_at: u64,
    /// Base64 vault salt the entries were sealed under.
    pub salt: String,
    /// Persisted entries.
    pub entries: Vec<BackupEntry>,
    /// Descriptive metadata.
    pub metadata: BackupMetadata,
    /// Format marker, must equal [`BACKUP_SIGNATURE`].
    pub signature: String,
    /// Hex HMAC over [`BackupFile::canonical_body`].
    pub checksum: String,
    /// Hex HMAC of a fixed verification string.
    pub key_fingerprint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalBody<'a> {
    version: u32,
    created_at: u64,
    salt: &'a str,
    entries: &'a [BackupEntry],
    metadata: &'a BackupMetadata,
}

/// Only the marker, read before anything else in the document is trusted.
#[derive(Deserialize)]
pub(super) struct SignatureProbe {
    #[serde(default)]
    pub(super) signature: Option<String>,
}

/// Only the key fingerprint, for password pre-flight checks.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FingerprintProbe {
    pub(super) key_fingerprint: String,
}

impl BackupFile {
    /// Bytes the checksum is computed over: the body fields in fixed order,
    /// compact JSON, no signature/checksum/fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn canonical_body(&self) -> VaultResult<Vec<u8>> {
        Ok(serde_json::to_vec(&CanonicalBody {
            version: self.version,
            created_at: self.created_at,
            salt: &self.salt,
            entries: &self.entries,
            metadata: &self.metadata,
        })?)
    }
}

/// Summary of a backup, readable once the password is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// Body version.
    pub version: u32,
    /// Export time, Unix ms.
    pub created_at: u64,
    /// Number of entries.
    pub total_entries: u64,
    /// Exporting client identity.
    pub device_fingerprint: String,
}

impl From<&BackupFile> for BackupInfo {
    fn from(file: &BackupFile) -> Self {
        Self {
            version: file.version,
            created_at: file.created_at,
            total_entries: file.metadata.total_entries,
            device_fingerprint: file.metadata.device_fingerprint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackupFile {
        BackupFile {
            version: BACKUP_VERSION,
            created_at: 42,
            salt: "c2FsdA==".to_string(),
            entries: vec![BackupEntry {
                id: "a".to_string(),
                encrypted: "{\"version\":1}".to_string(),
            }],
            metadata: BackupMetadata {
                total_entries: 1,
                device_fingerprint: "dev".to_string(),
            },
            signature: BACKUP_SIGNATURE.to_string(),
            checksum: "00".to_string(),
            key_fingerprint: "11".to_string(),
        }
    }

    #[test]
    fn test_canonical_body_excludes_signed_fields() {
        let body = String::from_utf8(sample().canonical_body().expect("body")).expect("utf8");
        assert_eq!(
            body,
            r#"{"version":1,"createdAt":42,"salt":"c2FsdA==","entries":[{"id":"a","encrypted":"{\"version\":1}"}],"metadata":{"totalEntries":1,"deviceFingerprint":"dev"}}"#
        );
    }

    #[test]
    fn test_canonical_body_survives_reparse() {
        let file = sample();
        let reparsed: BackupFile =
            serde_json::from_slice(&serde_json::to_vec(&file).expect("json")).expect("parse");
        assert_eq!(
            reparsed.canonical_body().expect("body"),
            file.canonical_body().expect("body")
        );
    }
}
