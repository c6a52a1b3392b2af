//! Shared fixtures for the provisioning integration tests: failure-injecting
//! wrappers around the in-tree keystore and store implementations.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use keyseal_core::{
    CipherError, KeyAlias, KeyPairHandle, KeyPairSpec, KeystoreError, MemorySecretStore,
    PaddingScheme, PutOutcome, SecretStore, SecureKeystore, SoftwareKeystore, StorageError,
};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

/// One 2048-bit key per test binary; RSA key generation is slow in debug
/// builds.
pub fn shared_rsa_key() -> RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen"))
        .clone()
}

/// Initializes a test subscriber once so `RUST_LOG` shows provisioning
/// events during test runs.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Keystore wrapper that injects failures around a [`SoftwareKeystore`].
pub struct FlakyKeystore {
    inner: SoftwareKeystore,
    fail_generation: AtomicBool,
    unavailable_budget: AtomicU32,
    decrypt_unavailable: Arc<AtomicBool>,
}

impl FlakyKeystore {
    /// Creates an empty keystore with no failures armed.
    pub fn new() -> Self {
        Self {
            inner: SoftwareKeystore::new(),
            fail_generation: AtomicBool::new(false),
            unavailable_budget: AtomicU32::new(0),
            decrypt_unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a keystore that already holds a keypair under `alias`.
    pub fn seeded(alias: &KeyAlias) -> Self {
        let keystore = Self::new();
        keystore
            .inner
            .import_key_pair(alias, shared_rsa_key(), PaddingScheme::Pkcs1V15);
        keystore
    }

    /// Makes every subsequent keypair generation fail permanently.
    pub fn fail_generation(&self) {
        self.fail_generation.store(true, Ordering::SeqCst);
    }

    /// Makes the next `count` keystore calls fail transiently.
    pub fn set_unavailable_budget(&self, count: u32) {
        self.unavailable_budget.store(count, Ordering::SeqCst);
    }

    /// Toggles transient failure of private-key decryption.
    pub fn set_decrypt_unavailable(&self, on: bool) {
        self.decrypt_unavailable.store(on, Ordering::SeqCst);
    }

    fn take_unavailable(&self) -> Result<(), KeystoreError> {
        let remaining = self.unavailable_budget.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_budget
                .store(remaining - 1, Ordering::SeqCst);
            return Err(KeystoreError::Unavailable {
                reason: "injected outage".into(),
            });
        }
        Ok(())
    }
}

impl Default for FlakyKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureKeystore for FlakyKeystore {
    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool, KeystoreError> {
        self.take_unavailable()?;
        self.inner.contains_alias(alias)
    }

    fn generate_key_pair(&self, alias: &KeyAlias, spec: &KeyPairSpec) -> Result<(), KeystoreError> {
        self.take_unavailable()?;
        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(KeystoreError::GenerationRejected {
                reason: "injected rejection".into(),
            });
        }
        // Import instead of generating so tests stay fast.
        let _ = spec;
        self.inner
            .import_key_pair(alias, shared_rsa_key(), PaddingScheme::Pkcs1V15);
        Ok(())
    }

    fn entry(&self, alias: &KeyAlias) -> Result<Arc<dyn KeyPairHandle>, KeystoreError> {
        self.take_unavailable()?;
        let inner = self.inner.entry(alias)?;
        Ok(Arc::new(FlakyHandle {
            inner,
            decrypt_unavailable: Arc::clone(&self.decrypt_unavailable),
        }))
    }
}

/// Handle wrapper that can fail decryption transiently.
struct FlakyHandle {
    inner: Arc<dyn KeyPairHandle>,
    decrypt_unavailable: Arc<AtomicBool>,
}

impl KeyPairHandle for FlakyHandle {
    fn alias(&self) -> &KeyAlias {
        self.inner.alias()
    }

    fn public_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.inner.public_encrypt(plaintext)
    }

    fn private_decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        if self.decrypt_unavailable.load(Ordering::SeqCst) {
            return Err(CipherError::Unavailable {
                reason: "injected keystore lock".into(),
            });
        }
        self.inner.private_decrypt(ciphertext)
    }

    fn max_plaintext_len(&self) -> usize {
        self.inner.max_plaintext_len()
    }

    fn fingerprint(&self) -> [u8; 32] {
        self.inner.fingerprint()
    }
}

/// Keystore whose every call blocks far longer than any test deadline.
pub struct SlowKeystore {
    /// How long each keystore call sleeps before answering.
    pub delay: Duration,
}

impl SecureKeystore for SlowKeystore {
    fn contains_alias(&self, _alias: &KeyAlias) -> Result<bool, KeystoreError> {
        thread::sleep(self.delay);
        Ok(false)
    }

    fn generate_key_pair(
        &self,
        _alias: &KeyAlias,
        _spec: &KeyPairSpec,
    ) -> Result<(), KeystoreError> {
        thread::sleep(self.delay);
        Err(KeystoreError::Unavailable {
            reason: "still busy".into(),
        })
    }

    fn entry(&self, alias: &KeyAlias) -> Result<Arc<dyn KeyPairHandle>, KeystoreError> {
        thread::sleep(self.delay);
        Err(KeystoreError::AliasNotFound {
            alias: alias.to_string(),
        })
    }
}

/// Store whose writes can be forced to fail.
pub struct BrokenStore {
    inner: MemorySecretStore,
    fail_puts: AtomicBool,
}

impl BrokenStore {
    /// Creates a store whose writes fail when `fail_puts` is set.
    pub fn new(fail_puts: bool) -> Self {
        Self {
            inner: MemorySecretStore::new(),
            fail_puts: AtomicBool::new(fail_puts),
        }
    }

    /// Returns `true` when nothing has been persisted.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: "injected write failure".into(),
            });
        }
        Ok(())
    }
}

impl SecretStore for BrokenStore {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(name)
    }

    fn put(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.inner.put(name, value)
    }

    fn put_if_absent(&self, name: &str, value: &str) -> Result<PutOutcome, StorageError> {
        self.check_writable()?;
        self.inner.put_if_absent(name, value)
    }
}

/// Store that simulates another process winning the first write between
/// this process's lookup and its conditional put.
pub struct RacingStore {
    inner: MemorySecretStore,
    winner: String,
    raced: AtomicBool,
}

impl RacingStore {
    /// Creates a store whose first conditional write loses to
    /// `winner_ciphertext`.
    pub fn new(winner_ciphertext: String) -> Self {
        Self {
            inner: MemorySecretStore::new(),
            winner: winner_ciphertext,
            raced: AtomicBool::new(false),
        }
    }
}

impl SecretStore for RacingStore {
    fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(name)
    }

    fn put(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.inner.put(name, value)
    }

    fn put_if_absent(&self, name: &str, value: &str) -> Result<PutOutcome, StorageError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            // The "other process" slips its record in first.
            self.inner.put(name, &self.winner)?;
        }
        self.inner.put_if_absent(name, value)
    }
}
