//! Field-level encryption for sensitive columns
//!
//! Values are sealed with AES-256-GCM under a key derived from a master
//! secret, with a fresh 96-bit nonce per call. The stored form is
//! `base64(nonce ‖ ciphertext ‖ tag)`.
//!
//! Reads are lenient: a value that is not well-formed ciphertext is assumed to
//! be legacy plaintext written before encryption was enabled and is returned
//! unchanged. [`FieldEncryption::decrypt_tagged`] tells the two cases apart
//! for callers that need to know.
//!
//! When no master secret is configured the service runs in disabled mode and
//! every operation is the identity function.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{
    crypto::{derive_key, keyed_hash, random_bytes},
    error::CryptoError,
};

/// Minimum length of the master secret, in characters.
pub const MIN_KEY_LENGTH: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Result of reading a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decryption {
    /// The value was ciphertext and opened under a known key.
    Decrypted(String),
    /// The value is not ciphertext and was returned as is.
    PassthroughLegacy(String),
    /// The value looks like ciphertext but no known key opens it.
    Failed(String),
}

impl Decryption {
    /// The best available plaintext. For [`Decryption::Failed`] this is the
    /// stored value itself.
    pub fn into_inner(self) -> String {
        match self {
            Decryption::Decrypted(v) | Decryption::PassthroughLegacy(v) | Decryption::Failed(v) => v,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Decryption::Failed(_))
    }
}

struct KeyMaterial {
    cipher: Aes256Gcm,
    hash_key: [u8; 32],
}

impl KeyMaterial {
    fn derive(master: &str) -> Result<Self, CryptoError> {
        if master.chars().count() < MIN_KEY_LENGTH {
            return Err(CryptoError::KeyTooShort {
                min: MIN_KEY_LENGTH,
            });
        }

        let key = derive_key(master.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Encryption)?;

        Ok(Self {
            cipher,
            hash_key: key,
        })
    }

    fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_bytes = random_bytes::<NONCE_LEN>();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn open(&self, nonce: &[u8], body: &[u8]) -> Option<String> {
        let plaintext = self.cipher.decrypt(Nonce::from_slice(nonce), body).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

struct KeyRing {
    active: KeyMaterial,
    /// Key replaced by the last rotation, kept for decryption only
    previous: Option<KeyMaterial>,
}

impl KeyRing {
    fn candidates(&self) -> impl Iterator<Item = &KeyMaterial> {
        std::iter::once(&self.active).chain(self.previous.as_ref())
    }
}

/// AES-256-GCM field encryption with a keyed search hash.
///
/// The key ring sits behind a lock so [`rotate`](Self::rotate) can swap it
/// while other tasks are encrypting. Each operation sees either the old or
/// the new ring, never a mix.
pub struct FieldEncryption {
    keys: RwLock<Option<KeyRing>>,
}

impl FieldEncryption {
    /// Build from an optional master secret.
    ///
    /// `None` or an empty string yields disabled mode. A secret shorter than
    /// [`MIN_KEY_LENGTH`] is rejected.
    pub fn new(master: Option<&str>) -> Result<Self, CryptoError> {
        let keys = match master.filter(|m| !m.is_empty()) {
            Some(master) => Some(KeyRing {
                active: KeyMaterial::derive(master)?,
                previous: None,
            }),
            None => {
                tracing::warn!("No encryption key configured, field encryption is disabled");
                None
            }
        };

        Ok(Self {
            keys: RwLock::new(keys),
        })
    }

    pub fn disabled() -> Self {
        Self {
            keys: RwLock::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.read().is_some()
    }

    /// Seal `plaintext` under the active key.
    ///
    /// The empty string stays empty. In disabled mode the input is returned
    /// unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        match self.read().as_ref() {
            Some(ring) => ring.active.seal(plaintext),
            None => Ok(plaintext.to_string()),
        }
    }

    /// Open a stored value, falling back to the value itself.
    ///
    /// This never fails. Ciphertext that no known key opens is logged and
    /// returned unchanged.
    pub fn decrypt(&self, value: &str) -> String {
        let result = self.decrypt_tagged(value);
        if result.is_failed() {
            tracing::warn!("Stored value failed authentication under every known key");
        }
        result.into_inner()
    }

    /// Open a stored value and report how it was interpreted.
    pub fn decrypt_tagged(&self, value: &str) -> Decryption {
        let guard = self.read();
        let Some(ring) = guard.as_ref() else {
            return Decryption::PassthroughLegacy(value.to_string());
        };

        let raw = match STANDARD.decode(value) {
            Ok(raw) if raw.len() >= NONCE_LEN + TAG_LEN => raw,
            _ => return Decryption::PassthroughLegacy(value.to_string()),
        };

        let (nonce, body) = raw.split_at(NONCE_LEN);
        ring.candidates()
            .find_map(|key| key.open(nonce, body))
            .map(Decryption::Decrypted)
            .unwrap_or_else(|| Decryption::Failed(value.to_string()))
    }

    /// Deterministic lookup hash of `value` under the active key.
    ///
    /// The input is trimmed and lowercased first, so `" Alice@Example.com"`
    /// and `"alice@example.com"` hash identically. In disabled mode the input
    /// is returned unchanged.
    pub fn hash_for_search(&self, value: &str) -> String {
        match self.read().as_ref() {
            Some(ring) => keyed_hash(&ring.active.hash_key, &value.trim().to_lowercase()),
            None => value.to_string(),
        }
    }

    /// Replace the active key.
    ///
    /// The key being replaced remains available for decryption until the next
    /// rotation. Search hashes change immediately, so callers must recompute
    /// stored hashes alongside [`reencrypt`](Self::reencrypt).
    pub fn rotate(&self, new_master: &str) -> Result<(), CryptoError> {
        let next = KeyMaterial::derive(new_master)?;

        let mut guard = self.write();
        let previous = guard.take().map(|ring| ring.active);
        *guard = Some(KeyRing {
            active: next,
            previous,
        });

        tracing::info!("Rotated field encryption key");
        Ok(())
    }

    /// Re-seal a stored value under the active key.
    ///
    /// Legacy plaintext is sealed as well. The caller persists the result.
    pub fn reencrypt(&self, value: &str) -> Result<String, CryptoError> {
        match self.decrypt_tagged(value) {
            Decryption::Decrypted(plaintext) | Decryption::PassthroughLegacy(plaintext) => {
                self.encrypt(&plaintext)
            }
            Decryption::Failed(_) => Err(CryptoError::Decryption),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<KeyRing>> {
        self.keys.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<KeyRing>> {
        self.keys.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for FieldEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.read();
        f.debug_struct("FieldEncryption")
            .field("enabled", &guard.is_some())
            .field(
                "has_previous_key",
                &guard.as_ref().is_some_and(|r| r.previous.is_some()),
            )
            .finish()
    }
}
