//! Durable, confidentiality-protected storage of a device secret.
//!
//! `keyseal-core` generates a random secret once (for example a database
//! encryption passphrase), protects it at rest with an asymmetric keypair
//! held inside a secure keystore, and returns the same secret on every
//! subsequent call. The private key never leaves the keystore; the secret
//! is persisted only as base64 RSA ciphertext.
//!
//! Three pieces carry the protocol:
//!
//! - [`KeystoreGateway`] provisions the device keypair: check-then-create
//!   under a lock, exponential backoff for transient backend failures,
//!   and an optional deadline for blocking keystore calls.
//! - [`EnvelopeCipher`] performs the asymmetric encrypt/decrypt and the
//!   base64 text transport, enforcing the padding's plaintext bound.
//! - [`SecretProvisioner`] runs the get-or-create state machine,
//!   serialized per logical name, with key-loss rotation as an explicit,
//!   logged event.
//!
//! Both external capabilities are traits: [`SecureKeystore`] for the
//! keypair backend and [`SecretStore`] for the persisted records. The
//! in-tree implementations ([`SoftwareKeystore`], [`MemorySecretStore`],
//! [`FileSecretStore`]) make the crate usable and testable without a
//! hardware keystore.
//!
//! ```
//! use std::sync::Arc;
//!
//! use keyseal_core::{
//!     GatewayConfig, KeystoreGateway, MemorySecretStore, SecretProvisioner, SoftwareKeystore,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let keystore = Arc::new(SoftwareKeystore::new());
//! let store = Arc::new(MemorySecretStore::new());
//! let gateway = KeystoreGateway::new(keystore, GatewayConfig::default())?;
//! let provisioner = SecretProvisioner::new(gateway, store);
//!
//! let secret = provisioner.get_or_create("db-key")?;
//! assert_eq!(secret, provisioner.get_or_create("db-key")?);
//! # Ok(())
//! # }
//! ```

mod cipher;
mod error;
mod gateway;
mod keystore;
mod provisioner;
mod secret;
mod store;
mod watchdog;

pub use cipher::{CipherConfig, EnvelopeCipher};
pub use error::{
    CipherError, KeyProvisionError, KeystoreError, ProvisionError, ProvisionResult, StorageError,
};
pub use gateway::{GatewayConfig, KeystoreGateway};
pub use keystore::{
    DigestAlgorithm, KeyAlias, KeyPairHandle, KeyPairSpec, KeyPurposes, PaddingScheme,
    SecureKeystore, SoftwareKeystore,
};
pub use provisioner::{ProvisionerConfig, SecretProvisioner};
pub use secret::{PlaintextSecret, SECRET_TOKEN_LEN};
pub use store::{FileSecretStore, MemorySecretStore, PutOutcome, SecretStore};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use rand::rngs::OsRng;
    use rsa::RsaPrivateKey;

    /// One 2048-bit key per test binary; RSA key generation is slow in
    /// debug builds.
    pub(crate) fn shared_rsa_key() -> RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen"))
            .clone()
    }
}
