//! The plaintext device secret handed to callers.

use std::fmt;

use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CipherError;

/// Number of characters in a generated secret token.
pub const SECRET_TOKEN_LEN: usize = 32;

/// A randomly generated, high-entropy device secret.
///
/// Generated tokens are derived from a UUID v4: [`SECRET_TOKEN_LEN`]
/// uppercase hex characters with no separators, which always fits the
/// envelope cipher's plaintext bound.
///
/// The value is zeroized on drop, `Debug` redacts it, and equality is
/// constant-time. The raw string is reachable only through
/// [`expose`](Self::expose).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PlaintextSecret(String);

impl PlaintextSecret {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut buf = Uuid::encode_buffer();
        let token = Uuid::new_v4().simple().encode_upper(&mut buf);
        Self(token.to_owned())
    }

    /// Rebuilds a secret from decrypted envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::CorruptCiphertext`] when the bytes are not
    /// valid UTF-8, i.e. a decryption that "succeeded" against a record
    /// this crate never wrote.
    pub(crate) fn from_decrypted(bytes: Zeroizing<Vec<u8>>) -> Result<Self, CipherError> {
        match String::from_utf8(bytes.to_vec()) {
            Ok(token) => Ok(Self(token)),
            Err(err) => {
                let mut leftover = err.into_bytes();
                leftover.zeroize();
                Err(CipherError::CorruptCiphertext {
                    reason: "decrypted bytes are not valid UTF-8".to_owned(),
                })
            }
        }
    }

    /// Returns the secret string.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl PartialEq for PlaintextSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for PlaintextSecret {}

impl fmt::Debug for PlaintextSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlaintextSecret").field(&"[REDACTED]").finish()
    }
}
