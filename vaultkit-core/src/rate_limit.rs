//! Escalating lockouts for failed unlock attempts.
//!
//! Counters are kept per caller-supplied identity. This is a usability
//! throttle: whoever controls the identity string can reset their own
//! counter, which is an accepted limitation of a local-only vault.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::VaultResult;
use crate::storage::{StorageError, StorageResult};

/// One lockout threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitTier {
    /// Failed attempts that trigger the lockout.
    pub max_attempts: u32,
    /// Decay window, in seconds. Only the shortest window across all tiers
    /// is read: it is the interval after which one failure is forgiven.
    /// Longer windows on other tiers have no effect.
    pub window_secs: u64,
    /// Lockout imposed once the threshold is reached, in seconds.
    pub lockout_secs: u64,
}

/// Set of tiers applied by a [`RateLimiter`].
///
/// The shortest window also drives counter decay: one failure is forgiven
/// per quiet window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Tiers, in any order.
    pub tiers: Vec<RateLimitTier>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RateLimitTier {
                    max_attempts: 5,
                    window_secs: 30,
                    lockout_secs: 30,
                },
                RateLimitTier {
                    max_attempts: 10,
                    window_secs: 5 * 60,
                    lockout_secs: 5 * 60,
                },
            ],
        }
    }
}

impl RateLimitPolicy {
    fn decay_window_ms(&self) -> u64 {
        self.tiers
            .iter()
            .map(|tier| tier.window_secs.saturating_mul(1_000))
            .min()
            .unwrap_or(0)
    }

    /// Lockout for the highest tier reached by `count`.
    fn lockout_for(&self, count: u32) -> Option<Duration> {
        self.tiers
            .iter()
            .filter(|tier| count >= tier.max_attempts)
            .max_by_key(|tier| (tier.max_attempts, tier.lockout_secs))
            .map(|tier| Duration::from_secs(tier.lockout_secs))
    }
}

/// Persisted counter state for one identity. Timestamps are Unix ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    /// Failures not yet forgiven.
    pub count: u32,
    /// Time of the most recent failure (advanced as decay is applied).
    pub last_attempt_at: u64,
    /// End of the current lockout, `0` when none was imposed.
    pub lockout_until: u64,
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum LimitDecision {
    /// The attempt may proceed.
    Allowed,
    /// Attempts are refused for `wait`.
    Locked {
        /// Time left in the lockout.
        wait: Duration,
    },
}

impl LimitDecision {
    /// Whether the attempt may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Persistence for [`RateLimitRecord`]s.
pub trait AttemptStore: Send + Sync {
    /// Loads the record for `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn load(&self, identity: &str) -> StorageResult<Option<RateLimitRecord>>;

    /// Stores the record for `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save(&self, identity: &str, record: &RateLimitRecord) -> StorageResult<()>;

    /// Deletes the record for `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn remove(&self, identity: &str) -> StorageResult<()>;
}

/// Process-local [`AttemptStore`].
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl MemoryAttemptStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, RateLimitRecord>>> {
        self.records
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn load(&self, identity: &str) -> StorageResult<Option<RateLimitRecord>> {
        Ok(self.records()?.get(identity).copied())
    }

    fn save(&self, identity: &str, record: &RateLimitRecord) -> StorageResult<()> {
        self.records()?.insert(identity.to_string(), *record);
        Ok(())
    }

    fn remove(&self, identity: &str) -> StorageResult<()> {
        self.records()?.remove(identity);
        Ok(())
    }
}

/// Tracks failed attempts per identity and enforces lockouts.
///
/// Construct once at the composition root and share it by `Arc`.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn AttemptStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter over an explicit store.
    #[must_use]
    pub const fn new(policy: RateLimitPolicy, store: Arc<dyn AttemptStore>) -> Self {
        Self { policy, store }
    }

    /// Creates a limiter with in-memory state.
    #[must_use]
    pub fn in_memory(policy: RateLimitPolicy) -> Self {
        Self::new(policy, Arc::new(MemoryAttemptStore::new()))
    }

    /// Returns whether an attempt may proceed at `now` (Unix ms).
    ///
    /// Outside a lockout, one failure is forgiven for every full decay
    /// window of quiet time since the later of the last failure and the
    /// end of the last lockout.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt store fails.
    pub fn check_limit(&self, identity: &str, now: u64) -> VaultResult<LimitDecision> {
        let Some(mut record) = self.store.load(identity)? else {
            return Ok(LimitDecision::Allowed);
        };

        if now < record.lockout_until {
            return Ok(LimitDecision::Locked {
                wait: Duration::from_millis(record.lockout_until - now),
            });
        }

        let window = self.policy.decay_window_ms();
        let quiet_since = record.last_attempt_at.max(record.lockout_until);
        if window > 0 && now.saturating_sub(quiet_since) > window {
            let elapsed_windows = now.saturating_sub(quiet_since) / window;
            let forgiven = u32::try_from(elapsed_windows).unwrap_or(u32::MAX);
            record.count = record.count.saturating_sub(forgiven);
            if record.count == 0 {
                self.store.remove(identity)?;
            } else {
                record.last_attempt_at =
                    quiet_since.saturating_add(elapsed_windows.saturating_mul(window));
                record.lockout_until = 0;
                self.store.save(identity, &record)?;
            }
        }

        Ok(LimitDecision::Allowed)
    }

    /// Records a failure at `now` and returns the resulting decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt store fails.
    pub fn record_failed_attempt(&self, identity: &str, now: u64) -> VaultResult<LimitDecision> {
        let mut record = self.store.load(identity)?.unwrap_or_default();
        record.count = record.count.saturating_add(1);
        record.last_attempt_at = now;

        let decision = match self.policy.lockout_for(record.count) {
            Some(lockout) => {
                let lockout_ms = u64::try_from(lockout.as_millis()).unwrap_or(u64::MAX);
                record.lockout_until = now.saturating_add(lockout_ms);
                log::warn!(
                    "unlock throttled after {} failed attempts for {}s",
                    record.count,
                    lockout.as_secs()
                );
                LimitDecision::Locked { wait: lockout }
            }
            None => LimitDecision::Allowed,
        };
        self.store.save(identity, &record)?;
        Ok(decision)
    }

    /// Clears all state for `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt store fails.
    pub fn record_successful_attempt(&self, identity: &str) -> VaultResult<()> {
        self.store.remove(identity)?;
        Ok(())
    }

    /// Current record for `identity`, for display.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt store fails.
    pub fn status(&self, identity: &str) -> VaultResult<Option<RateLimitRecord>> {
        Ok(self.store.load(identity)?)
    }
}

/// Coarse, non-cryptographic client identity: the first 16 hex characters
/// of SHA-256 over the joined `parts` (host name, platform, user, ...).
#[must_use]
pub fn client_fingerprint(parts: &[&str]) -> String {
    let digest = Sha256::digest(parts.join("|").as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "client-a";

    fn limiter() -> RateLimiter {
        RateLimiter::in_memory(RateLimitPolicy::default())
    }

    fn fail_n(limiter: &RateLimiter, n: u32, start: u64) -> LimitDecision {
        let mut decision = LimitDecision::Allowed;
        for i in 0..n {
            decision = limiter
                .record_failed_attempt(ID, start + u64::from(i) * 1_000)
                .expect("record");
        }
        decision
    }

    #[test]
    fn test_allows_unknown_identity() {
        assert!(limiter().check_limit(ID, 0).expect("check").is_allowed());
    }

    #[test]
    fn test_five_failures_lock_for_thirty_seconds() {
        let limiter = limiter();
        assert!(fail_n(&limiter, 4, 0).is_allowed());
        let decision = limiter.record_failed_attempt(ID, 4_000).expect("record");
        assert_eq!(decision, LimitDecision::Locked { wait: Duration::from_secs(30) });

        assert_eq!(
            limiter.check_limit(ID, 14_000).expect("check"),
            LimitDecision::Locked { wait: Duration::from_secs(20) }
        );
        assert!(limiter.check_limit(ID, 34_000).expect("check").is_allowed());
    }

    #[test]
    fn test_escalates_to_five_minutes_at_ten_failures() {
        let limiter = limiter();
        let mut now = 0;
        for _ in 0..5 {
            limiter.record_failed_attempt(ID, now).expect("record");
            now += 1_000;
        }
        // each further failure right after a lockout ends re-locks
        for attempt in 6..=10u32 {
            let record = limiter.status(ID).expect("status").expect("record");
            now = record.lockout_until;
            assert!(limiter.check_limit(ID, now).expect("check").is_allowed());
            let decision = limiter.record_failed_attempt(ID, now).expect("record");
            let expected = if attempt == 10 { 300 } else { 30 };
            assert_eq!(decision, LimitDecision::Locked { wait: Duration::from_secs(expected) });
        }
        assert_eq!(
            limiter.check_limit(ID, now + 60_000).expect("check"),
            LimitDecision::Locked { wait: Duration::from_secs(240) }
        );
    }

    #[test]
    fn test_success_resets() {
        let limiter = limiter();
        fail_n(&limiter, 5, 0);
        assert!(!limiter.check_limit(ID, 5_000).expect("check").is_allowed());

        limiter.record_successful_attempt(ID).expect("reset");
        assert!(limiter.status(ID).expect("status").is_none());
        assert!(limiter.check_limit(ID, 5_000).expect("check").is_allowed());
    }

    #[test]
    fn test_quiet_time_decays_counter() {
        let limiter = limiter();
        fail_n(&limiter, 3, 0);

        // 2 full windows of quiet forgive 2 failures
        assert!(limiter.check_limit(ID, 2_000 + 61_000).expect("check").is_allowed());
        let record = limiter.status(ID).expect("status").expect("record");
        assert_eq!(record.count, 1);

        assert!(limiter.check_limit(ID, 10 * 60_000).expect("check").is_allowed());
        assert!(limiter.status(ID).expect("status").is_none());
    }

    #[test]
    fn test_only_shortest_window_drives_decay() {
        let mut policy = RateLimitPolicy::default();
        policy.tiers[1].window_secs = 24 * 60 * 60;
        let limiter = RateLimiter::in_memory(policy);
        fail_n(&limiter, 3, 0);

        // one 30s window of quiet forgives one failure despite the day-long tier
        assert!(limiter.check_limit(ID, 2_000 + 31_000).expect("check").is_allowed());
        let record = limiter.status(ID).expect("status").expect("record");
        assert_eq!(record.count, 2);
        assert_eq!(record.last_attempt_at, 32_000);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter();
        fail_n(&limiter, 5, 0);
        assert!(!limiter.check_limit(ID, 5_000).expect("check").is_allowed());
        assert!(limiter.check_limit("client-b", 5_000).expect("check").is_allowed());
    }

    #[test]
    fn test_client_fingerprint_is_stable() {
        let first = client_fingerprint(&["laptop", "linux"]);
        assert_eq!(first.len(), 16);
        assert_eq!(first, client_fingerprint(&["laptop", "linux"]));
        assert_ne!(first, client_fingerprint(&["laptop", "macos"]));
    }
}
