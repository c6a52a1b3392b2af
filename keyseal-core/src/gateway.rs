//! Keypair provisioning gateway.
//!
//! Owns the keystore alias, the keypair spec, and the policy around backend
//! failures: check-then-create under a provisioning lock, exponential
//! backoff for transient errors, and an optional deadline for blocking
//! keystore calls.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use tracing::{debug, info, warn};

use crate::error::{KeyProvisionError, KeystoreError};
use crate::keystore::{KeyAlias, KeyPairHandle, KeyPairSpec, SecureKeystore};
use crate::watchdog;

const RETRY_MIN_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Configuration for [`KeystoreGateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Alias the keypair is stored under.
    pub alias: KeyAlias,
    /// Requested keypair parameters.
    pub spec: KeyPairSpec,
    /// Deadline for one keystore interaction; `None` blocks indefinitely.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt for transient backend failures.
    pub max_retries: usize,
}

impl GatewayConfig {
    /// Creates a config for `alias` with the default spec and retry policy.
    #[must_use]
    pub fn new(alias: KeyAlias) -> Self {
        Self {
            alias,
            spec: KeyPairSpec::default(),
            timeout: None,
            max_retries: 3, // total attempts = 4
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(KeyAlias::new("keyseal.device-key"))
    }
}

/// Provisions and fetches the device keypair.
///
/// One gateway manages one alias. Construct it once and share it by
/// reference; the check-then-create sequence runs under a gateway-owned
/// lock so concurrent first calls cannot create divergent keypairs.
pub struct KeystoreGateway {
    keystore: Arc<dyn SecureKeystore>,
    config: GatewayConfig,
    provision_lock: Mutex<()>,
}

impl KeystoreGateway {
    /// Creates a gateway over `keystore` with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProvisionError::IncompatibleSpec`] when the configured
    /// spec cannot serve envelope encryption, before the backend is ever
    /// touched.
    pub fn new(
        keystore: Arc<dyn SecureKeystore>,
        config: GatewayConfig,
    ) -> Result<Self, KeyProvisionError> {
        config
            .spec
            .validate()
            .map_err(|reason| KeyProvisionError::IncompatibleSpec { reason })?;
        Ok(Self {
            keystore,
            config,
            provision_lock: Mutex::new(()),
        })
    }

    /// Returns the configured alias.
    #[must_use]
    pub const fn alias(&self) -> &KeyAlias {
        &self.config.alias
    }

    /// Returns a handle to the device keypair, creating it on first use.
    ///
    /// Idempotent: an existing entry is returned without modification.
    /// Transient backend failures are retried with exponential backoff
    /// before surfacing.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyProvisionError`] when the keystore stays
    /// unavailable, rejects generation, or exceeds the configured
    /// deadline. These are fatal to the calling operation; there is no
    /// fallback keystore.
    pub fn ensure_key_pair(&self) -> Result<Arc<dyn KeyPairHandle>, KeyProvisionError> {
        let _guard = self
            .provision_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let keystore = Arc::clone(&self.keystore);
        let alias = self.config.alias.clone();
        let spec = self.config.spec.clone();
        let backoff = ExponentialBuilder::default()
            .with_min_delay(RETRY_MIN_DELAY)
            .with_max_delay(RETRY_MAX_DELAY)
            .with_max_times(self.config.max_retries);

        let attempt = move || ensure_once(keystore.as_ref(), &alias, &spec);
        let run = move || {
            attempt
                .retry(backoff)
                .when(|err: &KeystoreError| err.is_transient())
                .notify(|err: &KeystoreError, delay: Duration| {
                    warn!(error = %err, ?delay, "transient keystore failure, backing off");
                })
                .call()
        };

        match watchdog::call_with_deadline(self.config.timeout, run) {
            Some(Ok(handle)) => Ok(handle),
            Some(Err(KeystoreError::AliasNotFound { alias })) => {
                Err(KeyProvisionError::MissingEntry { alias })
            }
            Some(Err(err)) => Err(err.into()),
            None => Err(KeyProvisionError::Timeout {
                after: self.config.timeout.unwrap_or(Duration::ZERO),
            }),
        }
    }
}

fn ensure_once(
    keystore: &dyn SecureKeystore,
    alias: &KeyAlias,
    spec: &KeyPairSpec,
) -> Result<Arc<dyn KeyPairHandle>, KeystoreError> {
    let created = if keystore.contains_alias(alias)? {
        false
    } else {
        keystore.generate_key_pair(alias, spec)?;
        true
    };
    let handle = keystore.entry(alias)?;
    if created {
        info!(
            %alias,
            fingerprint = %hex::encode(handle.fingerprint()),
            modulus_bits = spec.modulus_bits,
            subject = %spec.subject_common_name,
            validity_days = spec.validity.as_secs() / 86_400,
            "generated device keypair"
        );
    } else {
        debug!(%alias, "reusing provisioned keypair");
    }
    Ok(handle)
}
