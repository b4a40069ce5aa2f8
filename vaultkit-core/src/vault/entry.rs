//! Credential records held in the vault.

use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};
use crate::totp;

/// One decrypted credential record.
///
/// `id` and `created_at` never change after creation; `updated_at` is set
/// on every update. Field contents are wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    /// Display name.
    pub title: String,
    /// Account name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Stored password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Site address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Normalized Base32 TOTP secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp_secret: Option<String>,
    /// Recovery codes for the second factor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_codes: Vec<String>,
    /// Creation time, Unix ms.
    pub created_at: u64,
    /// Last update time, Unix ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

impl VaultEntry {
    /// Checks the invariants of a record read back from storage or a
    /// backup: a non-blank title and, if present, a decodable TOTP secret.
    pub(crate) fn check(&self) -> VaultResult<()> {
        check_title(&self.title)?;
        if let Some(secret) = self.totp_secret.as_deref() {
            totp::validate_secret(secret)?;
        }
        Ok(())
    }
}

fn check_title(title: &str) -> VaultResult<()> {
    if title.trim().is_empty() {
        return Err(VaultError::InvalidEntry("title must not be empty".to_string()));
    }
    Ok(())
}

impl fmt::Debug for VaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultEntry")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("url", &self.url)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("has_totp", &self.totp_secret.is_some())
            .field("backup_codes", &self.backup_codes.len())
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Caller-editable fields of an entry, used for both add and update.
///
/// Updates replace every field; there is no field-level merge.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct EntryFields {
    /// Display name. Must not be blank.
    pub title: String,
    /// Account name.
    #[serde(default)]
    pub username: Option<String>,
    /// Stored password.
    #[serde(default)]
    pub password: Option<String>,
    /// Site address.
    #[serde(default)]
    pub url: Option<String>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Base32 TOTP secret; normalized on validation.
    #[serde(default)]
    pub totp_secret: Option<String>,
    /// Recovery codes.
    #[serde(default)]
    pub backup_codes: Vec<String>,
}

impl fmt::Debug for EntryFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryFields")
            .field("title", &self.title)
            .field("username", &self.username)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl EntryFields {
    /// Starts a record with only a title.
    // struct update syntax cannot move out of a `Drop` type
    #[allow(clippy::field_reassign_with_default)]
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let mut fields = Self::default();
        fields.title = title.into();
        fields
    }

    /// Sets the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets the TOTP secret.
    #[must_use]
    pub fn with_totp_secret(mut self, secret: impl Into<String>) -> Self {
        self.totp_secret = Some(secret.into());
        self
    }

    /// Sets the recovery codes.
    #[must_use]
    pub fn with_backup_codes(mut self, codes: Vec<String>) -> Self {
        self.backup_codes = codes;
        self
    }

    /// Checks the record invariants and normalizes the TOTP secret.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidEntry`] for a blank title and
    /// [`VaultError::InvalidTotpSecret`] for a malformed secret.
    pub fn validate(&mut self) -> VaultResult<()> {
        check_title(&self.title)?;
        if let Some(secret) = self.totp_secret.as_mut() {
            let normalized = totp::normalize_secret(secret)?;
            totp::validate_secret(&normalized)?;
            secret.zeroize();
            *secret = normalized;
        }
        Ok(())
    }

    /// Moves the fields into a full entry.
    pub(crate) fn into_entry(
        mut self,
        id: String,
        created_at: u64,
        updated_at: Option<u64>,
    ) -> VaultEntry {
        VaultEntry {
            id,
            title: mem::take(&mut self.title),
            username: self.username.take(),
            password: self.password.take(),
            url: self.url.take(),
            notes: self.notes.take(),
            totp_secret: self.totp_secret.take(),
            backup_codes: mem::take(&mut self.backup_codes),
            created_at,
            updated_at,
        }
    }
}
