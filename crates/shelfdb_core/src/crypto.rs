//! At-rest encryption envelope using AES-256-GCM.
//!
//! ## Security Model
//!
//! - AES-256-GCM authenticated encryption
//! - Fresh nonce per encryption operation
//! - Keys derived from a caller secret via HKDF-SHA256 and zeroized on drop
//! - Envelopes are self-describing: algorithm and key fingerprint travel
//!   with the ciphertext so decryption fails fast on mismatch instead of
//!   yielding garbage
//!
//! ## Usage
//!
//! ```
//! use shelfdb_core::crypto::Cipher;
//!
//! let cipher = Cipher::new("correct horse battery staple").unwrap();
//! let envelope = cipher.encrypt("secret data").unwrap();
//! assert_eq!(cipher.decrypt(&envelope).unwrap(), "secret data");
//! ```

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Minimum length of the caller secret.
pub const MIN_SECRET_LEN: usize = 16;
/// Algorithm identifier carried in every envelope.
pub const ALGORITHM: &str = "aes-256-gcm";

/// A self-describing encrypted blob.
///
/// Binary fields are base64; the key fingerprint is the hex of the
/// first 8 bytes of SHA-256 over the derived key. The envelope is what
/// lands on disk when at-rest encryption is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Per-encryption nonce, base64.
    pub iv: String,
    /// Ciphertext plus GCM tag, base64.
    pub ciphertext: String,
    /// Algorithm identifier, currently always `aes-256-gcm`.
    pub algorithm: String,
    /// Fingerprint of the key that produced the ciphertext.
    pub key_fingerprint: String,
    /// When the envelope was produced.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Checks whether a JSON value is shaped like an envelope.
    ///
    /// A best-effort structural test usable without the key, for
    /// distinguishing encrypted content from legacy plaintext.
    #[must_use]
    pub fn is_envelope(value: &Value) -> bool {
        value.get("iv").map_or(false, Value::is_string)
            && value.get("ciphertext").map_or(false, Value::is_string)
            && value.get("algorithm").map_or(false, Value::is_string)
            && value.get("keyFingerprint").map_or(false, Value::is_string)
    }

    /// Verifies the envelope's structure without the key.
    ///
    /// Checks the algorithm id, nonce length, minimum ciphertext
    /// length, and fingerprint shape. Passing this check does not prove
    /// the ciphertext is authentic; only decryption does.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        if self.algorithm != ALGORITHM {
            return false;
        }
        let iv_ok = BASE64
            .decode(&self.iv)
            .map_or(false, |iv| iv.len() == NONCE_SIZE);
        let ct_ok = BASE64
            .decode(&self.ciphertext)
            .map_or(false, |ct| ct.len() >= TAG_SIZE);
        let fp_ok =
            self.key_fingerprint.len() == 16 && self.key_fingerprint.bytes().all(|b| b.is_ascii_hexdigit());
        iv_ok && ct_ok && fp_ok
    }
}

/// Derived encryption key, zeroized when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Stretches a caller secret into a fixed-size key via HKDF-SHA256.
    fn derive(secret: &str) -> CoreResult<Self> {
        use hkdf::Hkdf;

        let hk = Hkdf::<Sha256>::new(Some(b"shelfdb-envelope-salt-v1"), secret.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"shelfdb-encryption-key-v1", &mut bytes)
            .map_err(|_| CoreError::encryption("key derivation failed"))?;
        Ok(Self { bytes })
    }

    fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Encrypts and decrypts envelopes with one derived key.
pub struct Cipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl Cipher {
    /// Derives a key from the caller secret and builds a cipher.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &str) -> CoreResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CoreError::validation(format!(
                "encryption secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let key = EncryptionKey::derive(secret)?;
        let fingerprint = key.fingerprint();
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));
        Ok(Self {
            cipher,
            fingerprint,
        })
    }

    /// Returns the fingerprint of the derived key.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypts a plaintext string into a fresh envelope.
    ///
    /// Every call draws a new random nonce, so encrypting the same
    /// plaintext twice yields different envelopes.
    ///
    /// # Errors
    ///
    /// Returns an encryption error if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str) -> CoreResult<Envelope> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::encryption("encryption failed"))?;

        Ok(Envelope {
            iv: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
            algorithm: ALGORITHM.to_string(),
            key_fingerprint: self.fingerprint.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Decrypts an envelope back to its plaintext.
    ///
    /// The algorithm id and key fingerprint are checked before the
    /// AEAD open, so a mismatched key or algorithm fails fast instead
    /// of producing wrong plaintext.
    ///
    /// # Errors
    ///
    /// Returns an encryption error on algorithm mismatch, key
    /// mismatch, or a corrupt envelope.
    pub fn decrypt(&self, envelope: &Envelope) -> CoreResult<String> {
        if envelope.algorithm != ALGORITHM {
            return Err(CoreError::encryption(format!(
                "unsupported algorithm: {}",
                envelope.algorithm
            )));
        }
        if envelope.key_fingerprint != self.fingerprint {
            return Err(CoreError::encryption(format!(
                "key fingerprint mismatch: envelope was sealed with {}",
                envelope.key_fingerprint
            )));
        }

        let nonce_bytes = BASE64
            .decode(&envelope.iv)
            .map_err(|_| CoreError::encryption("corrupt envelope iv"))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CoreError::encryption("corrupt envelope iv"));
        }
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| CoreError::encryption("corrupt envelope ciphertext"))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| CoreError::encryption("decryption failed"))?;

        String::from_utf8(plaintext).map_err(|_| CoreError::encryption("plaintext is not UTF-8"))
    }

    /// Re-seals an envelope under a new key.
    ///
    /// Decrypts with `self`, encrypts with `new`; the original
    /// envelope is never mutated in place.
    ///
    /// # Errors
    ///
    /// Returns an encryption error if either step fails.
    pub fn rotate(&self, new: &Cipher, envelope: &Envelope) -> CoreResult<Envelope> {
        new.encrypt(&self.decrypt(envelope)?)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &ALGORITHM)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
