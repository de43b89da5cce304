//! At-rest encryption for stored API keys
//!
//! # Algorithms
//!
//! - **Key derivation**: SHA-256 of the configured secret
//! - **Encryption**: ChaCha20-Poly1305 with a fresh random 12-byte nonce per value
//!
//! Ciphertext and nonce are stored hex-encoded in separate columns.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use empire_common::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Encrypted value as stored in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub ciphertext: String,
    pub nonce: String,
}

/// Symmetric cipher for API key values
#[derive(Clone)]
pub struct KeyCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for KeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyCipher(..)")
    }
}

impl KeyCipher {
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Cipher with a random key; values sealed with it do not survive a restart
    pub fn ephemeral() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    pub fn seal(&self, plaintext: &str) -> Result<SealedValue> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("Encryption failed: {e}")))?;

        Ok(SealedValue {
            ciphertext: hex::encode(ciphertext),
            nonce: hex::encode(nonce),
        })
    }

    /// Fails on malformed hex, a wrong key or tampered ciphertext
    pub fn open(&self, sealed: &SealedValue) -> Result<String> {
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|e| Error::Crypto(format!("Invalid ciphertext encoding: {e}")))?;
        let nonce = hex::decode(&sealed.nonce)
            .map_err(|e| Error::Crypto(format!("Invalid nonce encoding: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(Error::Crypto(format!(
                "Invalid nonce length: expected {NONCE_LEN}, got {}",
                nonce.len()
            )));
        }

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| Error::Crypto("Decryption failed: wrong key or corrupted data".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| Error::Crypto(format!("Decrypted value is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let cipher = KeyCipher::from_secret("correct horse");
        let sealed = cipher.seal("sk-test-123").unwrap();

        assert_ne!(sealed.ciphertext, hex::encode("sk-test-123"));
        assert_eq!(hex::decode(&sealed.nonce).unwrap().len(), NONCE_LEN);
        assert_eq!(cipher.open(&sealed).unwrap(), "sk-test-123");
    }

    #[test]
    fn test_nonce_is_fresh_per_value() {
        let cipher = KeyCipher::from_secret("secret");
        let a = cipher.seal("same").unwrap();
        let b = cipher.seal("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = KeyCipher::from_secret("one").seal("value").unwrap();
        let err = KeyCipher::from_secret("two").open(&sealed).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn test_tampered_and_malformed_values_fail() {
        let cipher = KeyCipher::ephemeral();
        let mut sealed = cipher.seal("value").unwrap();
        let mut bytes = hex::decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        sealed.ciphertext = hex::encode(bytes);
        assert!(cipher.open(&sealed).is_err());

        let malformed = SealedValue {
            ciphertext: "zz".to_string(),
            nonce: "00".to_string(),
        };
        assert!(cipher.open(&malformed).is_err());

        let short_nonce = SealedValue {
            ciphertext: cipher.seal("value").unwrap().ciphertext,
            nonce: "0011".to_string(),
        };
        assert!(cipher.open(&short_nonce).is_err());
    }
}
