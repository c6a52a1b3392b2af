//! Envelope encryption of short secrets with the device keypair.
//!
//! The secret is encrypted directly with the asymmetric public key (no
//! intermediate symmetric key), which bounds the plaintext by the modulus
//! size. Ciphertext travels as base64 so the persistent store only ever
//! sees strings.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::error::CipherError;
use crate::keystore::KeyPairHandle;
use crate::watchdog;

/// Configuration for [`EnvelopeCipher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherConfig {
    /// Deadline for one encrypt/decrypt call; `None` blocks indefinitely.
    /// Encrypt and decrypt may block on secure-element I/O just like
    /// provisioning does.
    pub timeout: Option<Duration>,
}

/// Asymmetric envelope encrypt/decrypt plus base64 text transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCipher {
    config: CipherConfig,
}

impl EnvelopeCipher {
    /// Creates a cipher with `config`.
    #[must_use]
    pub const fn new(config: CipherConfig) -> Self {
        Self { config }
    }

    /// Encrypts `plaintext` with the public half of `key_pair`.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::PlaintextTooLarge`] when the plaintext
    /// exceeds the keypair's padding bound, [`CipherError::Timeout`] when
    /// the configured deadline elapses, or the backend's error otherwise.
    pub fn encrypt(
        &self,
        key_pair: &Arc<dyn KeyPairHandle>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let max = key_pair.max_plaintext_len();
        if plaintext.len() > max {
            return Err(CipherError::PlaintextTooLarge {
                len: plaintext.len(),
                max,
            });
        }
        let key_pair = Arc::clone(key_pair);
        let plaintext = Zeroizing::new(plaintext.to_vec());
        self.bounded(move || key_pair.public_encrypt(&plaintext))
    }

    /// Decrypts `ciphertext` with the private half of `key_pair`.
    ///
    /// # Errors
    ///
    /// Returns a [`CipherError`] on padding mismatch, key invalidation,
    /// corrupted ciphertext, keystore unavailability, or deadline expiry.
    pub fn decrypt(
        &self,
        key_pair: &Arc<dyn KeyPairHandle>,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let key_pair = Arc::clone(key_pair);
        let ciphertext = ciphertext.to_vec();
        self.bounded(move || key_pair.private_decrypt(&ciphertext))
    }

    /// Encrypts `plaintext` and encodes the ciphertext as base64.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`encrypt`](Self::encrypt).
    pub fn encrypt_to_text(
        &self,
        key_pair: &Arc<dyn KeyPairHandle>,
        plaintext: &[u8],
    ) -> Result<String, CipherError> {
        Ok(BASE64.encode(self.encrypt(key_pair, plaintext)?))
    }

    /// Decodes a stored base64 value and decrypts it.
    ///
    /// ASCII whitespace in the stored value is tolerated; some platform
    /// encoders wrap base64 output at 76 columns.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encoding`] when the value is not valid
    /// base64, plus the failure modes of [`decrypt`](Self::decrypt).
    pub fn decrypt_from_text(
        &self,
        key_pair: &Arc<dyn KeyPairHandle>,
        text: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let ciphertext = BASE64
            .decode(compact.as_bytes())
            .map_err(|err| CipherError::Encoding {
                reason: err.to_string(),
            })?;
        self.decrypt(key_pair, &ciphertext)
    }

    fn bounded<T, F>(&self, op: F) -> Result<T, CipherError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, CipherError> + Send + 'static,
    {
        watchdog::call_with_deadline(self.config.timeout, op).map_or_else(
            || {
                Err(CipherError::Timeout {
                    after: self.config.timeout.unwrap_or(Duration::ZERO),
                })
            },
            |result| result,
        )
    }
}
