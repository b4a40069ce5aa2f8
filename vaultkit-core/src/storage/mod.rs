//! Persistence interface: the external key-value collaborator holding
//! encrypted envelopes and vault metadata.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use traits::{Collection, KeyValueStore};

/// Meta key holding the base64 vault salt.
pub const META_SALT: &str = "salt";
/// Meta key holding the password check envelope.
pub const META_CHECK: &str = "check";
