//! In-process software keystore built on the `rsa` crate.
//!
//! Not hardware-backed: keys live in a process-private map and disappear
//! with the process. Handles still never expose key material, so code
//! written against [`SecureKeystore`] behaves identically on a real
//! platform keystore.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CipherError, KeystoreError};

use super::{KeyAlias, KeyPairHandle, KeyPairSpec, PaddingScheme, SecureKeystore};

/// Software keystore holding RSA keypairs in process memory.
#[derive(Default)]
pub struct SoftwareKeystore {
    keys: RwLock<HashMap<KeyAlias, Arc<SoftwareKeyPairHandle>>>,
}

impl SoftwareKeystore {
    /// Creates an empty keystore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports an existing private key under `alias`, replacing any
    /// previous entry.
    ///
    /// Mirrors the key-import entry point real keystores expose. Also
    /// keeps test suites from paying for RSA key generation on every run.
    pub fn import_key_pair(
        &self,
        alias: &KeyAlias,
        private_key: RsaPrivateKey,
        padding: PaddingScheme,
    ) {
        let handle = Arc::new(SoftwareKeyPairHandle::new(
            alias.clone(),
            private_key,
            padding,
        ));
        self.keys
            .write()
            .expect("keystore map poisoned")
            .insert(alias.clone(), handle);
    }
}

impl SecureKeystore for SoftwareKeystore {
    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool, KeystoreError> {
        Ok(self
            .keys
            .read()
            .expect("keystore map poisoned")
            .contains_key(alias))
    }

    fn generate_key_pair(&self, alias: &KeyAlias, spec: &KeyPairSpec) -> Result<(), KeystoreError> {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, spec.modulus_bits).map_err(|err| {
                KeystoreError::GenerationRejected {
                    reason: err.to_string(),
                }
            })?;
        let handle = Arc::new(SoftwareKeyPairHandle::new(
            alias.clone(),
            private_key,
            spec.padding,
        ));
        // Create-if-absent: a generation that lost a race keeps the
        // existing entry rather than replacing it.
        self.keys
            .write()
            .expect("keystore map poisoned")
            .entry(alias.clone())
            .or_insert(handle);
        Ok(())
    }

    fn entry(&self, alias: &KeyAlias) -> Result<Arc<dyn KeyPairHandle>, KeystoreError> {
        self.keys
            .read()
            .expect("keystore map poisoned")
            .get(alias)
            .cloned()
            .map(|handle| handle as Arc<dyn KeyPairHandle>)
            .ok_or_else(|| KeystoreError::AliasNotFound {
                alias: alias.to_string(),
            })
    }
}

/// Handle over an in-memory RSA keypair.
struct SoftwareKeyPairHandle {
    alias: KeyAlias,
    public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
    padding: PaddingScheme,
    fingerprint: [u8; 32],
}

impl SoftwareKeyPairHandle {
    fn new(alias: KeyAlias, private_key: RsaPrivateKey, padding: PaddingScheme) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        let fingerprint = compute_fingerprint(&public_key);
        Self {
            alias,
            public_key,
            private_key,
            padding,
            fingerprint,
        }
    }
}

impl KeyPairHandle for SoftwareKeyPairHandle {
    fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    fn public_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let result = match self.padding {
            PaddingScheme::Pkcs1V15 => {
                self.public_key
                    .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            }
            PaddingScheme::OaepSha256 => {
                self.public_key
                    .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            }
        };
        result.map_err(|err| map_encrypt_error(&err, plaintext.len(), self.max_plaintext_len()))
    }

    fn private_decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        let modulus_len = self.public_key.size();
        if ciphertext.len() != modulus_len {
            return Err(CipherError::CorruptCiphertext {
                reason: format!(
                    "ciphertext is {} bytes, expected {modulus_len}",
                    ciphertext.len()
                ),
            });
        }
        let result = match self.padding {
            PaddingScheme::Pkcs1V15 => self.private_key.decrypt(Pkcs1v15Encrypt, ciphertext),
            PaddingScheme::OaepSha256 => self.private_key.decrypt(Oaep::new::<Sha256>(), ciphertext),
        };
        result
            .map(Zeroizing::new)
            .map_err(|err| map_decrypt_error(&err))
    }

    fn max_plaintext_len(&self) -> usize {
        self.padding.max_plaintext_len(self.public_key.size())
    }

    fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }
}

/// SHA-256 over the big-endian modulus and public exponent.
fn compute_fingerprint(public_key: &RsaPublicKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(public_key.n().to_bytes_be());
    hasher.update(public_key.e().to_bytes_be());
    hasher.finalize().into()
}

fn map_encrypt_error(err: &rsa::Error, len: usize, max: usize) -> CipherError {
    match err {
        rsa::Error::MessageTooLong => CipherError::PlaintextTooLarge { len, max },
        other => CipherError::UnsupportedAlgorithm {
            reason: other.to_string(),
        },
    }
}

fn map_decrypt_error(err: &rsa::Error) -> CipherError {
    match err {
        rsa::Error::Decryption => CipherError::PaddingMismatch,
        other => CipherError::CorruptCiphertext {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::shared_rsa_key;

    use super::*;

    fn seeded() -> (SoftwareKeystore, KeyAlias) {
        let alias = KeyAlias::new("test.software");
        let keystore = SoftwareKeystore::new();
        keystore.import_key_pair(&alias, shared_rsa_key(), PaddingScheme::Pkcs1V15);
        (keystore, alias)
    }

    #[test]
    fn contains_reflects_imports() {
        let (keystore, alias) = seeded();
        assert!(keystore.contains_alias(&alias).unwrap());
        assert!(!keystore
            .contains_alias(&KeyAlias::new("test.other"))
            .unwrap());
    }

    #[test]
    fn unknown_alias_has_no_entry() {
        let keystore = SoftwareKeystore::new();
        let err = keystore.entry(&KeyAlias::new("test.missing")).err().unwrap();
        assert!(matches!(err, KeystoreError::AliasNotFound { .. }));
    }

    #[test]
    fn handle_round_trips() {
        let (keystore, alias) = seeded();
        let handle = keystore.entry(&alias).unwrap();
        let ciphertext = handle.public_encrypt(b"hello").unwrap();
        let plaintext = handle.private_decrypt(&ciphertext).unwrap();
        assert_eq!(&*plaintext, b"hello");
    }

    #[test]
    fn fingerprint_is_stable_across_entries() {
        let (keystore, alias) = seeded();
        let first = keystore.entry(&alias).unwrap().fingerprint();
        let second = keystore.entry(&alias).unwrap().fingerprint();
        assert_eq!(first, second);
    }

    #[test]
    fn truncated_ciphertext_is_corrupt() {
        let (keystore, alias) = seeded();
        let handle = keystore.entry(&alias).unwrap();
        let err = handle.private_decrypt(&[0u8; 13]).unwrap_err();
        assert!(matches!(err, CipherError::CorruptCiphertext { .. }));
    }

    #[test]
    fn flipped_ciphertext_fails_padding() {
        let (keystore, alias) = seeded();
        let handle = keystore.entry(&alias).unwrap();
        let mut ciphertext = handle.public_encrypt(b"hello").unwrap();
        ciphertext[40] ^= 0xFF;
        let err = handle.private_decrypt(&ciphertext).unwrap_err();
        assert!(matches!(err, CipherError::PaddingMismatch));
    }
}
