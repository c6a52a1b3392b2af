//! Secure-keystore capability traits and keypair configuration.
//!
//! The keystore is an external collaborator: something that can generate
//! and hold an asymmetric keypair such that the private half never leaves
//! it. Platform implementations should use hardware-backed keystores where
//! available (Android Keystore, iOS Secure Enclave / Keychain, a TPM). The
//! in-tree [`SoftwareKeystore`] covers development, tests, and platforms
//! without a secure element.

mod software;

pub use software::SoftwareKeystore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::error::{CipherError, KeystoreError};

/// Stable logical name under which a keypair lives in the secure keystore.
///
/// The alias is configuration, supplied when the gateway is constructed;
/// distinct applications sharing a keystore pick distinct aliases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyAlias(String);

impl KeyAlias {
    /// Creates an alias from any string-like value.
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    /// Returns the alias as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyAlias {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KeyAlias {
    fn from(alias: &str) -> Self {
        Self::new(alias)
    }
}

/// Padding scheme negotiated between the keypair and the envelope cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingScheme {
    /// RSA PKCS#1 v1.5 encryption padding (the historical wire format).
    Pkcs1V15,
    /// RSA OAEP with SHA-256.
    OaepSha256,
}

impl PaddingScheme {
    /// Largest plaintext a keypair with `modulus_len` bytes can envelope.
    #[must_use]
    pub const fn max_plaintext_len(self, modulus_len: usize) -> usize {
        match self {
            // k - 11 for PKCS#1 v1.5.
            Self::Pkcs1V15 => modulus_len.saturating_sub(11),
            // k - 2*hLen - 2 for OAEP with SHA-256.
            Self::OaepSha256 => modulus_len.saturating_sub(66),
        }
    }
}

/// Digest algorithms the keypair may be used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

/// Purposes the generated keypair is scoped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPurposes {
    /// The public half may encrypt.
    pub encrypt: bool,
    /// The private half may decrypt.
    pub decrypt: bool,
}

impl Default for KeyPurposes {
    fn default() -> Self {
        Self {
            encrypt: true,
            decrypt: true,
        }
    }
}

/// Default certificate validity: effectively non-expiring.
const DEFAULT_VALIDITY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Requested keypair parameters.
///
/// A single declarative description of the keypair replaces per-OS API
/// branching: platform capability negotiation is the keystore
/// implementation's concern, not the caller's.
#[derive(Debug, Clone)]
pub struct KeyPairSpec {
    /// Modulus size in bits. Must be at least [`Self::MIN_MODULUS_BITS`].
    pub modulus_bits: usize,
    /// Purposes the keypair is scoped for.
    pub purposes: KeyPurposes,
    /// Padding scheme shared with the envelope cipher.
    pub padding: PaddingScheme,
    /// Digests the keypair may be used with.
    pub digests: Vec<DigestAlgorithm>,
    /// Cosmetic subject for the self-signed certificate.
    pub subject_common_name: String,
    /// Cosmetic certificate validity window.
    pub validity: Duration,
}

impl KeyPairSpec {
    /// Minimum accepted modulus size.
    pub const MIN_MODULUS_BITS: usize = 2048;

    /// Checks that the spec can serve envelope encryption.
    ///
    /// # Errors
    ///
    /// Returns a description of the first incompatibility found.
    pub fn validate(&self) -> Result<(), String> {
        if self.modulus_bits < Self::MIN_MODULUS_BITS {
            return Err(format!(
                "modulus of {} bits is below the {}-bit minimum",
                self.modulus_bits,
                Self::MIN_MODULUS_BITS
            ));
        }
        if !(self.purposes.encrypt && self.purposes.decrypt) {
            return Err("keypair must be scoped for both encrypt and decrypt".to_owned());
        }
        if self.padding == PaddingScheme::OaepSha256
            && !self.digests.contains(&DigestAlgorithm::Sha256)
        {
            return Err("OAEP-SHA256 padding requires SHA-256 among the allowed digests".to_owned());
        }
        Ok(())
    }
}

impl Default for KeyPairSpec {
    fn default() -> Self {
        Self {
            modulus_bits: Self::MIN_MODULUS_BITS,
            purposes: KeyPurposes::default(),
            padding: PaddingScheme::Pkcs1V15,
            digests: vec![DigestAlgorithm::Sha256, DigestAlgorithm::Sha512],
            subject_common_name: "CN=keyseal".to_owned(),
            validity: DEFAULT_VALIDITY,
        }
    }
}

/// Opaque reference to a keypair held inside the secure keystore.
///
/// The handle performs crypto on behalf of the caller; private key material
/// is never exposed through it.
pub trait KeyPairHandle: Send + Sync {
    /// Returns the alias this handle was fetched under.
    fn alias(&self) -> &KeyAlias;

    /// Encrypts `plaintext` with the public half.
    ///
    /// # Errors
    ///
    /// Returns a [`CipherError`] when the plaintext exceeds the padding
    /// bound or the keystore fails the operation.
    fn public_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypts `ciphertext` with the private half.
    ///
    /// # Errors
    ///
    /// Returns a [`CipherError`] on padding mismatch, key invalidation,
    /// corrupted ciphertext, or keystore unavailability.
    fn private_decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError>;

    /// Largest plaintext this keypair's padding leaves room for.
    fn max_plaintext_len(&self) -> usize;

    /// SHA-256 fingerprint of the public key, for logging.
    fn fingerprint(&self) -> [u8; 32];
}

/// The opaque secure-keystore capability.
///
/// Implementations must be safe to call from multiple threads. The gateway
/// serializes check-then-create per alias, so `generate_key_pair` is never
/// raced through a single gateway; implementations backing several gateways
/// (or processes) should still prefer atomic create-if-absent semantics.
pub trait SecureKeystore: Send + Sync {
    /// Returns whether an entry exists under `alias`.
    ///
    /// # Errors
    ///
    /// Returns a [`KeystoreError`] when the keystore cannot be queried.
    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool, KeystoreError>;

    /// Generates a keypair per `spec` and stores it under `alias`.
    ///
    /// # Errors
    ///
    /// Returns a [`KeystoreError`] when generation is rejected or the
    /// keystore is unavailable.
    fn generate_key_pair(&self, alias: &KeyAlias, spec: &KeyPairSpec) -> Result<(), KeystoreError>;

    /// Returns a handle to the keypair stored under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::AliasNotFound`] when no entry exists.
    fn entry(&self, alias: &KeyAlias) -> Result<Arc<dyn KeyPairHandle>, KeystoreError>;
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn default_spec_is_valid() {
        assert!(KeyPairSpec::default().validate().is_ok());
    }

    #[test_case(1024; "small modulus")]
    #[test_case(512; "tiny modulus")]
    fn undersized_modulus_is_rejected(bits: usize) {
        let spec = KeyPairSpec {
            modulus_bits: bits,
            ..KeyPairSpec::default()
        };
        assert!(spec.validate().unwrap_err().contains("minimum"));
    }

    #[test]
    fn missing_purpose_is_rejected() {
        let spec = KeyPairSpec {
            purposes: KeyPurposes {
                encrypt: true,
                decrypt: false,
            },
            ..KeyPairSpec::default()
        };
        assert!(spec.validate().unwrap_err().contains("decrypt"));
    }

    #[test]
    fn oaep_requires_sha256_digest() {
        let spec = KeyPairSpec {
            padding: PaddingScheme::OaepSha256,
            digests: vec![DigestAlgorithm::Sha512],
            ..KeyPairSpec::default()
        };
        assert!(spec.validate().unwrap_err().contains("SHA-256"));
    }

    #[test]
    fn plaintext_bounds_match_padding_overhead() {
        // 2048-bit modulus = 256 bytes.
        assert_eq!(PaddingScheme::Pkcs1V15.max_plaintext_len(256), 245);
        assert_eq!(PaddingScheme::OaepSha256.max_plaintext_len(256), 190);
    }
}
