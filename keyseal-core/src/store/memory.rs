//! In-memory secret store for tests and ephemeral processes.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{PutOutcome, SecretStore};
use crate::error::StorageError;

/// Thread-safe in-memory store backed by a `HashMap`.
///
/// `put_if_absent` is atomic: the check and the insert happen under one
/// write lock.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    ///
    /// # Panics
    ///
    /// Panics if the record lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Returns `true` when no records are stored.
    ///
    /// # Panics
    ///
    /// Panics if the record lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Removes every record.
    ///
    /// # Panics
    ///
    /// Panics if the record lock is poisoned.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.read().unwrap().get(name).cloned())
    }

    fn put(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.records
            .write()
            .unwrap()
            .insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    fn put_if_absent(&self, name: &str, value: &str) -> Result<PutOutcome, StorageError> {
        let mut records = self.records.write().unwrap();
        if let Some(existing) = records.get(name) {
            if !existing.trim().is_empty() {
                return Ok(PutOutcome::AlreadyPresent {
                    existing: existing.clone(),
                });
            }
        }
        records.insert(name.to_owned(), value.to_owned());
        Ok(PutOutcome::Stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_if_absent_keeps_the_first_writer() {
        let store = MemorySecretStore::new();
        assert_eq!(store.put_if_absent("a", "one").unwrap(), PutOutcome::Stored);
        assert_eq!(
            store.put_if_absent("a", "two").unwrap(),
            PutOutcome::AlreadyPresent {
                existing: "one".to_owned()
            }
        );
        assert_eq!(store.get("a").unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn empty_records_do_not_block_first_write() {
        let store = MemorySecretStore::new();
        store.put("a", "  ").unwrap();
        assert_eq!(store.put_if_absent("a", "one").unwrap(), PutOutcome::Stored);
        assert_eq!(store.get("a").unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn put_overwrites() {
        let store = MemorySecretStore::new();
        store.put("a", "one").unwrap();
        store.put("a", "two").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("two"));
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
