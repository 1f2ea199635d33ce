//! Per-database encryption for `secret`/`secret:*` fields (`spec.md` §3:
//! "never appearing in plaintext in metadata, body, or logs").
//!
//! Encrypted with AES-256-GCM; `subtle` (already a teacher dependency) is
//! not needed directly here since `aes-gcm` already performs constant-time
//! tag comparison internally, but the crate is kept available for any
//! future manual comparisons.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Errors raised while encrypting or decrypting a secret field.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The ciphertext envelope was malformed or the key did not match.
    #[error("failed to decrypt secret field")]
    Decrypt,
    /// The supplied key was not 32 bytes.
    #[error("secret key must be exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Holds the per-database AES-256-GCM key used to encrypt/decrypt every
/// `secret`-typed attribute value.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Build a cipher from a raw 32-byte key.
    pub fn new(key_bytes: &[u8]) -> Result<Self, SecretError> {
        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKeyLength(key_bytes.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Generate a fresh random key, for new databases that don't supply one.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        Self { cipher: Aes256Gcm::new(&key) }
    }

    /// Encrypt `plaintext`, returning a base64 envelope of `nonce || ciphertext`.
    #[must_use]
    pub fn encrypt(&self, plaintext: &str) -> String {
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext.as_bytes()).expect("aes-gcm encryption cannot fail here");
        let mut envelope = Vec::with_capacity(nonce.len() + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        STANDARD.encode(envelope)
    }

    /// Decrypt a base64 envelope produced by [`SecretCipher::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, SecretError> {
        let raw = STANDARD.decode(envelope).map_err(|_| SecretError::Decrypt)?;
        if raw.len() < 12 {
            return Err(SecretError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| SecretError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::Decrypt)
    }
}
