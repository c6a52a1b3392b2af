//! Error types for secret provisioning.
//!
//! Each layer has its own error enum, and the failure classification that
//! drives recovery lives on the types themselves: `is_transient` separates
//! "key temporarily unreachable" from "key permanently lost", which is the
//! difference between propagating an error and rotating the secret.

use std::time::Duration;

use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors raised by the secure-keystore capability.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// The keystore is temporarily unreachable (locked, busy, mid-boot).
    #[error("secure keystore unavailable: {reason}")]
    Unavailable {
        /// Description of the condition.
        reason: String,
    },

    /// The keystore refused access to the alias or operation.
    #[error("secure keystore denied access: {reason}")]
    PermissionDenied {
        /// Description of the denial.
        reason: String,
    },

    /// Keypair generation was rejected (no secure element, policy forbids it).
    #[error("keypair generation rejected: {reason}")]
    GenerationRejected {
        /// Description of the rejection.
        reason: String,
    },

    /// No entry exists under the requested alias.
    #[error("no keystore entry for alias `{alias}`")]
    AliasNotFound {
        /// The alias that was looked up.
        alias: String,
    },

    /// Any other backend failure.
    #[error("keystore backend error: {reason}")]
    Backend {
        /// Description of the failure.
        reason: String,
    },
}

impl KeystoreError {
    /// Returns `true` when the failure may clear on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors raised while provisioning the device keypair.
///
/// These are fatal to the calling operation: there is no fallback keystore,
/// and no partial write may follow one.
#[derive(Debug, Error)]
pub enum KeyProvisionError {
    /// The underlying keystore failed (after transient retries).
    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    /// A keystore call exceeded the configured deadline.
    #[error("keystore call exceeded deadline of {after:?}")]
    Timeout {
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The requested keypair spec cannot serve envelope encryption.
    #[error("keypair spec incompatible with envelope encryption: {reason}")]
    IncompatibleSpec {
        /// Why the spec was rejected.
        reason: String,
    },

    /// The keystore reported the alias present but returned no entry.
    #[error("keystore reported alias `{alias}` present but returned no entry")]
    MissingEntry {
        /// The alias whose entry went missing.
        alias: String,
    },
}

/// Errors raised by envelope encrypt/decrypt.
///
/// Permanent variants are recoverable by the provisioner (treated as "no
/// valid secret present"); transient variants must never trigger rotation.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Padding check failed during decryption (wrong key or tampered data).
    #[error("padding mismatch during decryption")]
    PaddingMismatch,

    /// The keypair no longer matches the ciphertext (OS key rotation).
    #[error("key mismatch: {reason}")]
    KeyMismatch {
        /// Description of the mismatch.
        reason: String,
    },

    /// The ciphertext is structurally invalid.
    #[error("corrupted ciphertext: {reason}")]
    CorruptCiphertext {
        /// What made the ciphertext unusable.
        reason: String,
    },

    /// The keypair uses an algorithm this cipher cannot drive.
    #[error("unsupported algorithm: {reason}")]
    UnsupportedAlgorithm {
        /// Description of the incompatibility.
        reason: String,
    },

    /// The plaintext exceeds what the padding leaves room for.
    #[error("plaintext of {len} bytes exceeds the {max}-byte bound")]
    PlaintextTooLarge {
        /// Length of the rejected plaintext.
        len: usize,
        /// Largest plaintext the keypair can envelope.
        max: usize,
    },

    /// Base64 (or UTF-8) transport encoding failed.
    #[error("transport encoding error: {reason}")]
    Encoding {
        /// Description of the encoding failure.
        reason: String,
    },

    /// The keystore was temporarily unavailable during the operation.
    #[error("keystore unavailable during cipher operation: {reason}")]
    Unavailable {
        /// Description of the condition.
        reason: String,
    },

    /// The cipher call exceeded the configured deadline.
    #[error("cipher call exceeded deadline of {after:?}")]
    Timeout {
        /// The deadline that elapsed.
        after: Duration,
    },
}

impl CipherError {
    /// Returns `true` when the failure may clear on retry.
    ///
    /// Transient failures must never be treated as key loss: rotating the
    /// secret over a temporarily locked keystore would silently invalidate
    /// everything encrypted under the old value.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Errors raised by the persistent secret store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store failed.
    #[error("storage backend error: {reason}")]
    Backend {
        /// Description of the failure.
        reason: String,
    },

    /// An I/O operation on the backing file failed.
    #[error("storage i/o failure while {context}")]
    Io {
        /// The operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The persisted document could not be (de)serialized.
    #[error("secret record serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// The persisted document uses a format version this build cannot read.
    #[error("unsupported secret store format version {found}")]
    UnsupportedVersion {
        /// The version found on disk.
        found: u32,
    },
}

/// Caller-facing error for [`get_or_create`](crate::SecretProvisioner::get_or_create).
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The logical key name is empty or blank.
    #[error("logical key name must not be empty")]
    InvalidName,

    /// The device keypair could not be provisioned.
    #[error(transparent)]
    KeyProvision(#[from] KeyProvisionError),

    /// Envelope encryption or decryption failed irrecoverably.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The persistent store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
