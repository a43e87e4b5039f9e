//! AES-256-GCM encryption for integration tokens.
//!
//! Each token is encrypted separately with a unique nonce. The configured secret
//! can be any non-empty string: the 32-byte cipher key is its SHA-256 digest.
//!
//! Sealed format: `base64(nonce):base64(ciphertext)`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Separator between the encoded nonce and the encoded ciphertext
const SEPARATOR: char = ':';

/// Cipher failures.
///
/// None of these are recoverable by the user; callers must surface them.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption key is not configured")]
    MissingKey,

    #[error("malformed sealed token: {0}")]
    Malformed(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (wrong key or corrupted data)")]
    Decrypt,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

/// A token that has been through [`CredentialCipher::seal`].
///
/// The store only accepts and returns `SealedToken`s, so plaintext cannot be
/// persisted by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedToken(String);

impl SealedToken {
    /// Wraps a value read back from storage.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Ciphertext stays out of logs as well.
impl fmt::Debug for SealedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedToken(..)")
    }
}

/// Server-wide symmetric cipher for tokens at rest.
///
/// Built from an optional secret. Without one, every call fails with
/// [`CipherError::MissingKey`] instead of falling back to a default key.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Option<[u8; 32]>,
}

impl CredentialCipher {
    /// Derives the cipher key from `secret`. Empty or whitespace-only secrets
    /// count as absent.
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(derive_key);
        Self { key }
    }

    /// Whether a key was configured.
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypts `plaintext` with a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<SealedToken, CipherError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        Ok(SealedToken(format!(
            "{}{}{}",
            BASE64.encode(nonce),
            SEPARATOR,
            BASE64.encode(ciphertext)
        )))
    }

    /// Decrypts a sealed token.
    ///
    /// Fails on a missing separator, bad base64, a wrong nonce length, a wrong
    /// key or tampered ciphertext.
    pub fn open(&self, sealed: &SealedToken) -> Result<String, CipherError> {
        let cipher = self.cipher()?;

        let (nonce_b64, ciphertext_b64) = sealed
            .0
            .split_once(SEPARATOR)
            .ok_or_else(|| CipherError::Malformed("missing nonce separator".to_string()))?;

        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| CipherError::Malformed(format!("nonce is not base64: {}", e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CipherError::Malformed(format!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| CipherError::Malformed(format!("ciphertext is not base64: {}", e)))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CipherError> {
        let key = self.key.as_ref().ok_or(CipherError::MissingKey)?;
        Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Encrypt)
    }
}

fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}
