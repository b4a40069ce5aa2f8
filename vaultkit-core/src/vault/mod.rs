//! Vault lifecycle and credential records.

mod entry;
mod store;

pub use entry::{EntryFields, VaultEntry};
pub use store::{UnlockOutcome, VaultState, VaultStore};
