//! RSA signing keys for certificates and the tamper ledger.
//!
//! The private key PEM is the single durable source of truth; the public key
//! is always derived from it and the exported `public_key.pem` is a
//! convenience copy for external verifiers.

use crate::{AttestError, AttestResult};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use rsa::{pkcs1v15, pss, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// Modulus size for generated keys
pub const KEY_BITS: usize = 2048;

/// RSA signature padding schemes, both over SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Probabilistic (RSASSA-PSS); used for embedded certificate signatures
    Pss,
    /// Deterministic (RSASSA-PKCS1-v1_5); used for ledger entries
    Pkcs1v15,
}

pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl KeyPair {
    fn from_private(private_key: RsaPrivateKey) -> Self {
        let public_key = private_key.to_public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

enum KeyStorage {
    Durable(PathBuf),
    Ephemeral,
}

/// Owner of the engine's signing keypair.
pub struct KeyManager {
    storage: KeyStorage,
    auto_generate: bool,
    // Also serializes first-time generation within the process
    keys: Mutex<Option<Arc<KeyPair>>>,
}

impl KeyManager {
    /// Keys persisted as PEM files under `key_dir`.
    pub fn durable(key_dir: impl Into<PathBuf>, auto_generate: bool) -> Self {
        Self {
            storage: KeyStorage::Durable(key_dir.into()),
            auto_generate,
            keys: Mutex::new(None),
        }
    }

    /// In-memory keys generated lazily and lost when dropped.
    pub fn ephemeral() -> Self {
        Self {
            storage: KeyStorage::Ephemeral,
            auto_generate: true,
            keys: Mutex::new(None),
        }
    }

    /// In-memory manager around an existing key.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        Self {
            storage: KeyStorage::Ephemeral,
            auto_generate: false,
            keys: Mutex::new(Some(Arc::new(KeyPair::from_private(private_key)))),
        }
    }

    pub fn key_dir(&self) -> Option<&Path> {
        match &self.storage {
            KeyStorage::Durable(dir) => Some(dir),
            KeyStorage::Ephemeral => None,
        }
    }

    /// Make sure a keypair exists, generating and persisting one if needed.
    ///
    /// Idempotent; concurrent first callers end up sharing one keypair.
    pub fn ensure_keys(&self) -> AttestResult<()> {
        self.key_pair().map(|_| ())
    }

    pub fn has_keys(&self) -> bool {
        match self.keys.lock() {
            Ok(guard) if guard.is_some() => true,
            _ => match &self.storage {
                KeyStorage::Durable(dir) => dir.join(PRIVATE_KEY_FILE).exists(),
                KeyStorage::Ephemeral => false,
            },
        }
    }

    pub fn key_pair(&self) -> AttestResult<Arc<KeyPair>> {
        let mut guard = self
            .keys
            .lock()
            .map_err(|_| AttestError::Crypto("key manager lock poisoned".to_string()))?;

        if let Some(pair) = guard.as_ref() {
            return Ok(Arc::clone(pair));
        }

        let pair = match &self.storage {
            KeyStorage::Durable(dir) => match load_private_key(dir)? {
                Some(key) => KeyPair::from_private(key),
                None if self.auto_generate => generate_and_persist(dir)?,
                None => {
                    return Err(AttestError::KeyMaterialMissing(format!(
                        "no {} in {}",
                        PRIVATE_KEY_FILE,
                        dir.display()
                    )))
                }
            },
            KeyStorage::Ephemeral if self.auto_generate => KeyPair::from_private(generate()?),
            KeyStorage::Ephemeral => {
                return Err(AttestError::KeyMaterialMissing(
                    "ephemeral key manager holds no key".to_string(),
                ))
            }
        };

        let pair = Arc::new(pair);
        *guard = Some(Arc::clone(&pair));
        Ok(pair)
    }

    pub fn sign(&self, data: &[u8], scheme: SignatureScheme) -> AttestResult<Vec<u8>> {
        let pair = self.key_pair()?;

        let signature = match scheme {
            SignatureScheme::Pss => {
                let signing_key = pss::BlindedSigningKey::<Sha256>::new(pair.private_key.clone());
                signing_key
                    .try_sign_with_rng(&mut rand::thread_rng(), data)
                    .map_err(|e| AttestError::Crypto(format!("PSS signing failed: {}", e)))?
                    .to_vec()
            }
            SignatureScheme::Pkcs1v15 => {
                let signing_key = pkcs1v15::SigningKey::<Sha256>::new(pair.private_key.clone());
                signing_key
                    .try_sign(data)
                    .map_err(|e| AttestError::Crypto(format!("PKCS#1 v1.5 signing failed: {}", e)))?
                    .to_vec()
            }
        };

        Ok(signature)
    }

    /// Check `signature` over `data`.
    ///
    /// Malformed or mismatching signatures are `Ok(false)`; only missing key
    /// material is an error.
    pub fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        scheme: SignatureScheme,
    ) -> AttestResult<bool> {
        let pair = self.key_pair()?;
        let public_key = pair.public_key.clone();

        let valid = match scheme {
            SignatureScheme::Pss => match pss::Signature::try_from(signature) {
                Ok(sig) => pss::VerifyingKey::<Sha256>::new(public_key)
                    .verify(data, &sig)
                    .is_ok(),
                Err(_) => false,
            },
            SignatureScheme::Pkcs1v15 => match pkcs1v15::Signature::try_from(signature) {
                Ok(sig) => pkcs1v15::VerifyingKey::<Sha256>::new(public_key)
                    .verify(data, &sig)
                    .is_ok(),
                Err(_) => false,
            },
        };

        Ok(valid)
    }

    pub fn public_key_pem(&self) -> AttestResult<String> {
        let pair = self.key_pair()?;
        pair.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AttestError::Crypto(format!("Failed to encode public key: {}", e)))
    }
}

fn generate() -> AttestResult<RsaPrivateKey> {
    RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
        .map_err(|e| AttestError::Crypto(format!("RSA key generation failed: {}", e)))
}

fn load_private_key(dir: &Path) -> AttestResult<Option<RsaPrivateKey>> {
    let path = dir.join(PRIVATE_KEY_FILE);
    let pem = match fs::read_to_string(&path) {
        Ok(pem) => pem,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AttestError::IoFailure(e)),
    };

    RsaPrivateKey::from_pkcs8_pem(&pem)
        .map(Some)
        .map_err(|e| AttestError::Crypto(format!("Corrupt {}: {}", path.display(), e)))
}

/// Generate a key and publish it with an atomic create-if-absent.
///
/// The PEM is written to a private temp file and hard-linked into place;
/// linking fails if another process published first, in which case its key
/// wins and ours is discarded.
fn generate_and_persist(dir: &Path) -> AttestResult<KeyPair> {
    fs::create_dir_all(dir)?;

    let key = generate()?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AttestError::Crypto(format!("Failed to encode private key: {}", e)))?;

    let final_path = dir.join(PRIVATE_KEY_FILE);
    let temp_path = dir.join(format!("{}.{}.tmp", PRIVATE_KEY_FILE, Uuid::new_v4().simple()));

    write_new_file(&temp_path, pem.as_bytes(), 0o600)?;

    let published = match fs::hard_link(&temp_path, &final_path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(AttestError::IoFailure(e));
        }
    };
    fs::remove_file(&temp_path)?;

    let pair = if published {
        tracing::info!(dir = %dir.display(), bits = KEY_BITS, "Generated RSA signing keypair");
        KeyPair::from_private(key)
    } else {
        tracing::debug!(dir = %dir.display(), "Lost key generation race, loading published key");
        let winner = load_private_key(dir)?.ok_or_else(|| {
            AttestError::KeyMaterialMissing(format!("{} vanished", final_path.display()))
        })?;
        KeyPair::from_private(winner)
    };

    export_public_key(dir, &pair)?;
    Ok(pair)
}

fn export_public_key(dir: &Path, pair: &KeyPair) -> AttestResult<()> {
    let pem = pair
        .public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AttestError::Crypto(format!("Failed to encode public key: {}", e)))?;

    let temp_path = dir.join(format!("{}.{}.tmp", PUBLIC_KEY_FILE, Uuid::new_v4().simple()));
    write_new_file(&temp_path, pem.as_bytes(), 0o644)?;
    fs::rename(&temp_path, dir.join(PUBLIC_KEY_FILE))?;
    Ok(())
}

fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rogue_keys, test_keys};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_pss_sign_verify_round_trip() {
        let keys = test_keys();
        let sig = keys.sign(b"payload", SignatureScheme::Pss).unwrap();
        assert_eq!(sig.len(), KEY_BITS / 8);
        assert!(keys.verify(b"payload", &sig, SignatureScheme::Pss).unwrap());
        assert!(!keys.verify(b"payload!", &sig, SignatureScheme::Pss).unwrap());
    }

    #[test]
    fn test_pss_is_probabilistic() {
        let keys = test_keys();
        let a = keys.sign(b"payload", SignatureScheme::Pss).unwrap();
        let b = keys.sign(b"payload", SignatureScheme::Pss).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_pkcs1v15_is_deterministic() {
        let keys = test_keys();
        let a = keys.sign(b"ledger", SignatureScheme::Pkcs1v15).unwrap();
        let b = keys.sign(b"ledger", SignatureScheme::Pkcs1v15).unwrap();
        assert_eq!(a, b);
        assert!(keys.verify(b"ledger", &a, SignatureScheme::Pkcs1v15).unwrap());
    }

    #[test]
    fn test_schemes_do_not_cross_verify() {
        let keys = test_keys();
        let sig = keys.sign(b"payload", SignatureScheme::Pkcs1v15).unwrap();
        assert!(!keys.verify(b"payload", &sig, SignatureScheme::Pss).unwrap());
    }

    #[test]
    fn test_foreign_key_signature_is_rejected() {
        let sig = rogue_keys().sign(b"payload", SignatureScheme::Pss).unwrap();
        assert!(!test_keys().verify(b"payload", &sig, SignatureScheme::Pss).unwrap());
    }

    #[test]
    fn test_malformed_signature_is_false_not_error() {
        let keys = test_keys();
        assert!(!keys.verify(b"payload", &[], SignatureScheme::Pss).unwrap());
        assert!(!keys.verify(b"payload", &[1, 2, 3], SignatureScheme::Pkcs1v15).unwrap());
    }

    #[test]
    fn test_missing_keys_without_auto_generation() {
        let temp = TempDir::new().unwrap();
        let keys = KeyManager::durable(temp.path(), false);

        assert!(!keys.has_keys());
        assert!(matches!(
            keys.sign(b"x", SignatureScheme::Pss),
            Err(AttestError::KeyMaterialMissing(_))
        ));
        assert!(matches!(
            keys.verify(b"x", &[0u8; 256], SignatureScheme::Pss),
            Err(AttestError::KeyMaterialMissing(_))
        ));
    }

    #[test]
    fn test_durable_keys_generated_once_and_reloaded() {
        let temp = TempDir::new().unwrap();

        let first = KeyManager::durable(temp.path(), true);
        first.ensure_keys().unwrap();
        first.ensure_keys().unwrap();
        assert!(temp.path().join(PRIVATE_KEY_FILE).exists());
        assert!(temp.path().join(PUBLIC_KEY_FILE).exists());

        let sig = first.sign(b"persisted", SignatureScheme::Pss).unwrap();

        // A fresh manager over the same directory must load, not regenerate
        let second = KeyManager::durable(temp.path(), false);
        assert!(second.has_keys());
        assert!(second.verify(b"persisted", &sig, SignatureScheme::Pss).unwrap());
        assert_eq!(first.public_key_pem().unwrap(), second.public_key_pem().unwrap());

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[test]
    fn test_concurrent_first_callers_share_one_keypair() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();

        // Separate managers model separate processes racing on the same directory
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dir = dir.clone();
                thread::spawn(move || {
                    let keys = KeyManager::durable(dir, true);
                    keys.public_key_pem().unwrap()
                })
            })
            .collect();

        let pems: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pems.windows(2).all(|w| w[0] == w[1]), "keypairs diverged");

        let on_disk = KeyManager::durable(&dir, false).public_key_pem().unwrap();
        assert_eq!(on_disk, pems[0]);
    }

    #[test]
    fn test_corrupt_key_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(PRIVATE_KEY_FILE), "not a pem").unwrap();

        let keys = KeyManager::durable(temp.path(), true);
        assert!(matches!(keys.ensure_keys(), Err(AttestError::Crypto(_))));
    }
}
