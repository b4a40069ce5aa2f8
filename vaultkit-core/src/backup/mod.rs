//! Portable encrypted backups of a vault.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

mod codec;
pub mod format;

pub use codec::BackupCodec;
pub use format::{
    BackupEntry, BackupFile, BackupInfo, BackupMetadata, BACKUP_FILE_EXTENSION, BACKUP_SIGNATURE,
    BACKUP_VERSION,
};

/// How an imported backup is combined with the current vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImportMode {
    /// Keep existing entries, add the ones whose id is not present.
    Merge,
    /// Replace the vault contents, salt included, with the backup.
    Overwrite,
}

/// Result of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    /// Entries carried by the backup.
    pub total_entries: usize,
    /// Entries actually written.
    pub imported: usize,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_import_mode_parsing() {
        assert_eq!(ImportMode::from_str("merge").expect("mode"), ImportMode::Merge);
        assert_eq!(ImportMode::from_str("overwrite").expect("mode"), ImportMode::Overwrite);
        assert!(ImportMode::from_str("replace").is_err());
        assert_eq!(ImportMode::Overwrite.to_string(), "overwrite");
    }
}
