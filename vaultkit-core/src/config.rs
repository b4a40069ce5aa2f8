use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;
use crate::rate_limit::RateLimitPolicy;

/// Tunables for a [`VaultStore`](crate::VaultStore).
///
/// Every field has a default, so a partial JSON document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    /// PBKDF2 iterations for the vault key.
    pub kdf_iterations: u32,
    /// PBKDF2 iterations for the backup master key. Must match between
    /// the exporting and the importing side.
    pub backup_iterations: u32,
    /// Unlock throttling tiers.
    pub rate_limit: RateLimitPolicy,
    /// Extra TOTP steps accepted on either side of the current one.
    pub totp_skew_steps: u8,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            backup_iterations: DEFAULT_KDF_ITERATIONS,
            rate_limit: RateLimitPolicy::default(),
            totp_skew_steps: 0,
        }
    }
}
