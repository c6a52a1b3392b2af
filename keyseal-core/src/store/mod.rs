//! Persistent storage of encrypted secret records.
//!
//! The store is the second external collaborator: an opaque key-value
//! capability holding one string per logical name. Values are base64
//! ciphertext; implementations never see plaintext.

mod file;
mod memory;

pub use file::FileSecretStore;
pub use memory::MemorySecretStore;

use crate::error::StorageError;

/// Result of a conditional first write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The value was stored; no prior record existed.
    Stored,
    /// Another writer got there first.
    AlreadyPresent {
        /// The record already persisted under the name.
        existing: String,
    },
}

/// Opaque persistent key-value capability for secret records.
pub trait SecretStore: Send + Sync {
    /// Returns the record stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend cannot be read.
    fn get(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `name`, replacing any existing record.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the write fails.
    fn put(&self, name: &str, value: &str) -> Result<(), StorageError>;

    /// Stores `value` under `name` only when no non-empty record exists.
    ///
    /// The default implementation is a best-effort get-then-put: it is
    /// atomic only against writers that also hold the provisioner's
    /// per-name lock. Backends with native compare-and-set semantics
    /// should override it to extend first-write-wins across processes.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the backend fails.
    fn put_if_absent(&self, name: &str, value: &str) -> Result<PutOutcome, StorageError> {
        match self.get(name)? {
            Some(existing) if !existing.trim().is_empty() => {
                Ok(PutOutcome::AlreadyPresent { existing })
            }
            _ => {
                self.put(name, value)?;
                Ok(PutOutcome::Stored)
            }
        }
    }
}
