//! Security utilities for CalBridge
//!
//! This module provides the credential cipher used to protect CalDAV
//! passwords at rest. Sources store only ciphertext; decryption happens in
//! memory at the start of a sync pass.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};

use crate::error::CipherError;

/// Nonce size for XChaCha20-Poly1305 (24 bytes)
const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes)
const KEY_SIZE: usize = 32;

/// Reversible cipher for endpoint credentials
///
/// Implementations must be safe to share across sync tasks.
pub trait CredentialCipher: Send + Sync {
    /// Encrypt a plaintext credential into its armored storage form
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;

    /// Decrypt an armored credential back to plaintext
    fn decrypt(&self, armored: &str) -> Result<String, CipherError>;
}

/// XChaCha20-Poly1305 credential cipher
///
/// Ciphertext layout is `nonce || ciphertext`, base64-armored for storage in
/// a TEXT column. The 192-bit nonce is drawn fresh per encryption.
pub struct XChaChaCipher {
    cipher: XChaCha20Poly1305,
}

impl std::fmt::Debug for XChaChaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaChaCipher")
            .field("cipher", &"[XChaCha20Poly1305]")
            .finish()
    }
}

impl XChaChaCipher {
    /// Create a cipher from a raw 32-byte key
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }

        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Create a cipher from a base64-encoded 32-byte key (the env form)
    pub fn from_base64_key(armored: &str) -> Result<Self, CipherError> {
        let key = BASE64
            .decode(armored.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Self::new(&key)
    }

    /// Generate a new random key, base64-armored for the environment
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }
}

impl CredentialCipher for XChaChaCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptFailed)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, armored: &str) -> Result<String, CipherError> {
        let combined = BASE64
            .decode(armored.trim())
            .map_err(|_| CipherError::DecryptFailed)?;

        if combined.len() <= NONCE_SIZE {
            return Err(CipherError::DecryptFailed);
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> XChaChaCipher {
        XChaChaCipher::from_base64_key(&XChaChaCipher::generate_key()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = test_cipher();
        let armored = cipher.encrypt("caldav-password-123").unwrap();

        // Ciphertext never contains the plaintext
        assert!(!armored.contains("caldav-password-123"));
        assert_eq!(cipher.decrypt(&armored).unwrap(), "caldav-password-123");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_wrong_key() {
        let armored = test_cipher().encrypt("secret").unwrap();
        let other = test_cipher();
        assert!(matches!(
            other.decrypt(&armored),
            Err(CipherError::DecryptFailed)
        ));
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert!(matches!(
            XChaChaCipher::new(&[0u8; 16]),
            Err(CipherError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_ciphertext() {
        let cipher = test_cipher();
        assert!(cipher.decrypt("AAAA").is_err());
        assert!(cipher.decrypt("not base64 !!!").is_err());
    }
}
