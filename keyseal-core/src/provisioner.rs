//! Get-or-create orchestration of the device secret.
//!
//! The state machine is `Lookup -> {FoundValid, FoundInvalid, NotFound} ->
//! {Return, Regenerate} -> Persist -> Return`, with every branch explicit:
//!
//! - a record that decrypts cleanly is returned with no writes;
//! - a record that is *permanently* undecryptable (key invalidated by the
//!   OS, corrupted ciphertext) triggers a logged rotation that overwrites
//!   it with a fresh secret;
//! - a *transient* failure (keystore locked, deadline hit) propagates
//!   instead, because rotating over a temporarily unreachable key would
//!   silently invalidate everything encrypted under the old secret;
//! - an absent record mints a new secret and persists it with a
//!   conditional first write, adopting any concurrent winner.
//!
//! Calls are serialized per logical name, so concurrent first runs within
//! a process converge on a single persisted secret.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::cipher::EnvelopeCipher;
use crate::error::{CipherError, ProvisionError, ProvisionResult, StorageError};
use crate::gateway::KeystoreGateway;
use crate::keystore::KeyPairHandle;
use crate::secret::PlaintextSecret;
use crate::store::{PutOutcome, SecretStore};

/// Configuration for [`SecretProvisioner`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionerConfig {
    /// When persisting a freshly generated secret fails, return the
    /// secret anyway instead of surfacing the storage error.
    ///
    /// The next run cannot reproduce an unpersisted value and will mint a
    /// new one; every fallback is logged loudly. Off by default.
    pub ephemeral_fallback: bool,
}

/// Outcome of the lookup phase.
enum Lookup {
    /// The persisted record decrypted cleanly.
    FoundValid(PlaintextSecret),
    /// A record exists but can never decrypt again.
    FoundInvalid,
    /// No usable record is persisted.
    NotFound,
}

/// How the regenerated secret is persisted.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PersistMode {
    /// Conditional first write; a concurrent winner is adopted.
    FirstWrite,
    /// Unconditional overwrite of an invalid record.
    RotateOverwrite,
}

/// Registry of per-name mutexes serializing `get_or_create`.
#[derive(Default)]
struct NameLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    fn for_name(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_owned()).or_default())
    }
}

/// Durable get-or-create provisioning of named device secrets.
pub struct SecretProvisioner {
    gateway: KeystoreGateway,
    cipher: EnvelopeCipher,
    store: Arc<dyn SecretStore>,
    config: ProvisionerConfig,
    locks: NameLocks,
}

impl SecretProvisioner {
    /// Creates a provisioner with a default cipher and configuration.
    #[must_use]
    pub fn new(gateway: KeystoreGateway, store: Arc<dyn SecretStore>) -> Self {
        Self::with_config(
            gateway,
            EnvelopeCipher::default(),
            store,
            ProvisionerConfig::default(),
        )
    }

    /// Creates a provisioner with an explicit cipher and configuration.
    #[must_use]
    pub fn with_config(
        gateway: KeystoreGateway,
        cipher: EnvelopeCipher,
        store: Arc<dyn SecretStore>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            gateway,
            cipher,
            store,
            config,
            locks: NameLocks::default(),
        }
    }

    /// Returns the secret for `name`, generating and persisting it on
    /// first use.
    ///
    /// Repeated calls return the identical secret for as long as the
    /// record and the device keypair survive. A permanently undecryptable
    /// record is rotated: a new secret replaces it and anything encrypted
    /// under the old one becomes unreadable, which is the documented
    /// recovery path after OS-level key invalidation.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisionError`] when the name is blank, the keypair
    /// cannot be provisioned, the keystore fails transiently, or the new
    /// record cannot be persisted (unless
    /// [`ephemeral_fallback`](ProvisionerConfig::ephemeral_fallback) is
    /// enabled). A secret is never returned unless it is backed by a
    /// durable, decryptable record or the caller opted into the fallback.
    pub fn get_or_create(&self, name: &str) -> ProvisionResult<PlaintextSecret> {
        if name.trim().is_empty() {
            return Err(ProvisionError::InvalidName);
        }

        let lock = self.locks.for_name(name);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.lookup(name)? {
            Lookup::FoundValid(secret) => {
                debug!(name, "returning existing secret");
                Ok(secret)
            }
            Lookup::FoundInvalid => self.regenerate(name, PersistMode::RotateOverwrite),
            Lookup::NotFound => self.regenerate(name, PersistMode::FirstWrite),
        }
    }

    fn lookup(&self, name: &str) -> ProvisionResult<Lookup> {
        let Some(ciphertext) = self.store.get(name)? else {
            debug!(name, "no persisted record");
            return Ok(Lookup::NotFound);
        };
        if ciphertext.trim().is_empty() {
            // Left behind by implementations that persisted the record
            // even when encryption had failed.
            warn!(name, "empty persisted record, treating as absent");
            return Ok(Lookup::NotFound);
        }

        let key_pair = self.gateway.ensure_key_pair()?;
        match self
            .cipher
            .decrypt_from_text(&key_pair, &ciphertext)
            .and_then(PlaintextSecret::from_decrypted)
        {
            Ok(secret) => Ok(Lookup::FoundValid(secret)),
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => {
                log_rotation(name, &err, key_pair.as_ref());
                Ok(Lookup::FoundInvalid)
            }
        }
    }

    fn regenerate(&self, name: &str, mode: PersistMode) -> ProvisionResult<PlaintextSecret> {
        let secret = PlaintextSecret::generate();
        let key_pair = self.gateway.ensure_key_pair()?;
        let ciphertext = self
            .cipher
            .encrypt_to_text(&key_pair, secret.expose().as_bytes())?;

        let persisted = match mode {
            PersistMode::RotateOverwrite => self.store.put(name, &ciphertext).map(|()| None),
            PersistMode::FirstWrite => {
                self.store
                    .put_if_absent(name, &ciphertext)
                    .map(|outcome| match outcome {
                        PutOutcome::Stored => None,
                        PutOutcome::AlreadyPresent { existing } => Some(existing),
                    })
            }
        };

        match persisted {
            Ok(None) => {
                info!(name, "provisioned new secret");
                Ok(secret)
            }
            Ok(Some(existing)) => self.adopt_winner(name, &key_pair, &existing),
            Err(err) => self.handle_persist_failure(name, secret, err),
        }
    }

    /// Another writer persisted a record between our lookup and the first
    /// write (a cooperating process sharing the store). Converge on the
    /// winner's secret so every caller observes the same value.
    fn adopt_winner(
        &self,
        name: &str,
        key_pair: &Arc<dyn KeyPairHandle>,
        existing: &str,
    ) -> ProvisionResult<PlaintextSecret> {
        match self
            .cipher
            .decrypt_from_text(key_pair, existing)
            .and_then(PlaintextSecret::from_decrypted)
        {
            Ok(secret) => {
                debug!(name, "adopted concurrently persisted secret");
                Ok(secret)
            }
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => {
                // The winner's record can never decrypt; rotate over it.
                log_rotation(name, &err, key_pair.as_ref());
                self.regenerate(name, PersistMode::RotateOverwrite)
            }
        }
    }

    fn handle_persist_failure(
        &self,
        name: &str,
        secret: PlaintextSecret,
        err: StorageError,
    ) -> ProvisionResult<PlaintextSecret> {
        if self.config.ephemeral_fallback {
            warn!(
                name,
                error = %err,
                "persist failed, returning ephemeral secret; the next run will mint a new one"
            );
            Ok(secret)
        } else {
            Err(err.into())
        }
    }
}

fn log_rotation(name: &str, reason: &CipherError, key_pair: &dyn KeyPairHandle) {
    warn!(
        name,
        %reason,
        key_fingerprint = %hex::encode(key_pair.fingerprint()),
        "persisted secret is undecryptable, rotating"
    );
}
