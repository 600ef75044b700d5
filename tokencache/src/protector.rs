//! Payload protection for the L2 path.
//!
//! Bytes leaving the process for L2 can be encrypted by a [`PayloadProtector`]
//! bound to a purpose string. A protector for one purpose cannot decrypt data
//! protected under another, so unrelated consumers of the same key material
//! stay isolated. L1 entries are never protected.
//!
//! [`AesGcmProtectorProvider`] is the stock provider: AES-256-GCM with
//! per-purpose subkeys derived from a keyring of master keys.
//!
//! # Envelope
//!
//! ```text
//! ┌─────────┬────────────┬────────┬───────────┬────────────────┐
//! │ version │ key_id_len │ key_id │ nonce(12) │ ciphertext+tag │
//! │  1 byte │   1 byte   │   n    │           │                │
//! └─────────┴────────────┴────────┴───────────┴────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ProtectorError;

/// Purpose string the adapter binds its protector to.
pub const PROTECTOR_PURPOSE: &str = "tokencache.l2-payload.v1";

/// Envelope format version.
const ENVELOPE_VERSION: u8 = 1;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits).
pub const KEY_SIZE: usize = 32;

/// Domain separator mixed into every subkey derivation.
const DERIVATION_LABEL: &[u8] = b"tokencache/protector-subkey";

/// Encrypts and decrypts payloads for one purpose.
pub trait PayloadProtector: Send + Sync {
    /// The purpose this protector is bound to.
    fn purpose(&self) -> &str;

    /// Encrypt plaintext bytes.
    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectorError>;

    /// Decrypt bytes produced by [`protect`](Self::protect).
    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectorError>;
}

/// Hands out protectors, typically backed by a secret-protection subsystem.
pub trait ProtectorProvider: Send + Sync {
    /// Create a protector for `purpose`, or `None` if protection is unavailable.
    fn create_protector(&self, purpose: &str) -> Option<Arc<dyn PayloadProtector>>;
}

/// AES-256-GCM provider with a rotating keyring.
///
/// New payloads are encrypted with the current key; payloads written under
/// a retired key still decrypt as long as that key stays in the ring.
#[derive(Clone)]
pub struct AesGcmProtectorProvider {
    current_key_id: String,
    keyring: HashMap<String, [u8; KEY_SIZE]>,
}

impl AesGcmProtectorProvider {
    /// Create a provider whose current key is `key`.
    ///
    /// Key ids longer than 255 bytes cannot be written into the envelope and
    /// make `protect` fail.
    pub fn new(key_id: impl Into<String>, key: [u8; KEY_SIZE]) -> Self {
        let key_id = key_id.into();
        let mut keyring = HashMap::new();
        keyring.insert(key_id.clone(), key);
        Self {
            current_key_id: key_id,
            keyring,
        }
    }

    /// Keep an older key for decrypting existing payloads.
    pub fn with_retired_key(mut self, key_id: impl Into<String>, key: [u8; KEY_SIZE]) -> Self {
        self.keyring.entry(key_id.into()).or_insert(key);
        self
    }

    /// Switch to a new current key, keeping the old one for decryption.
    pub fn rotate(mut self, key_id: impl Into<String>, key: [u8; KEY_SIZE]) -> Self {
        let key_id = key_id.into();
        self.keyring.insert(key_id.clone(), key);
        self.current_key_id = key_id;
        self
    }

    /// Generate a random master key.
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    /// Current key id.
    pub fn current_key_id(&self) -> &str {
        &self.current_key_id
    }
}

/// Derive the purpose-bound subkey for one master key.
fn derive_subkey(master: &[u8; KEY_SIZE], purpose: &str) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(DERIVATION_LABEL);
    hasher.update(master);
    hasher.update((purpose.len() as u64).to_be_bytes());
    hasher.update(purpose.as_bytes());

    let mut subkey = [0u8; KEY_SIZE];
    subkey.copy_from_slice(&hasher.finalize());
    subkey
}

impl ProtectorProvider for AesGcmProtectorProvider {
    fn create_protector(&self, purpose: &str) -> Option<Arc<dyn PayloadProtector>> {
        let mut ciphers = HashMap::with_capacity(self.keyring.len());
        for (key_id, master) in &self.keyring {
            let subkey = derive_subkey(master, purpose);
            let cipher = Aes256Gcm::new_from_slice(&subkey).ok()?;
            ciphers.insert(key_id.clone(), cipher);
        }

        Some(Arc::new(AesGcmProtector {
            purpose: purpose.to_string(),
            current_key_id: self.current_key_id.clone(),
            ciphers,
        }))
    }
}

impl fmt::Debug for AesGcmProtectorProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmProtectorProvider")
            .field("current_key_id", &self.current_key_id)
            .field("keyring_size", &"<redacted>")
            .finish()
    }
}

/// Protector produced by [`AesGcmProtectorProvider`].
struct AesGcmProtector {
    purpose: String,
    current_key_id: String,
    ciphers: HashMap<String, Aes256Gcm>,
}

impl PayloadProtector for AesGcmProtector {
    fn purpose(&self) -> &str {
        &self.purpose
    }

    fn protect(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectorError> {
        let key_id = self.current_key_id.as_bytes();
        let key_id_len = u8::try_from(key_id.len()).map_err(|_| {
            ProtectorError::Encrypt(format!("key id is {} bytes, max 255", key_id.len()))
        })?;
        let cipher = self
            .ciphers
            .get(&self.current_key_id)
            .ok_or_else(|| ProtectorError::UnknownKey(self.current_key_id.clone()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ProtectorError::Encrypt(e.to_string()))?;

        let mut envelope = Vec::with_capacity(2 + key_id.len() + NONCE_SIZE + ciphertext.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.push(key_id_len);
        envelope.extend_from_slice(key_id);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    fn unprotect(&self, protected: &[u8]) -> Result<Vec<u8>, ProtectorError> {
        let (&version, rest) = protected
            .split_first()
            .ok_or_else(|| ProtectorError::Malformed("empty payload".to_string()))?;
        if version != ENVELOPE_VERSION {
            return Err(ProtectorError::Malformed(format!(
                "unsupported envelope version {}",
                version
            )));
        }

        let (&key_id_len, rest) = rest
            .split_first()
            .ok_or_else(|| ProtectorError::Malformed("missing key id".to_string()))?;
        let key_id_len = key_id_len as usize;
        if rest.len() < key_id_len + NONCE_SIZE {
            return Err(ProtectorError::Malformed("payload truncated".to_string()));
        }

        let (key_id, rest) = rest.split_at(key_id_len);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
        let key_id = std::str::from_utf8(key_id)
            .map_err(|_| ProtectorError::Malformed("key id is not UTF-8".to_string()))?;

        let cipher = self
            .ciphers
            .get(key_id)
            .ok_or_else(|| ProtectorError::UnknownKey(key_id.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ProtectorError::Decrypt(e.to_string()))
    }
}
