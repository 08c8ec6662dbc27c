//! AES-256-GCM token encryption
//!
//! Each value gets a fresh 96-bit nonce. The nonce and ciphertext are stored
//! together as a JSON envelope, base64-encoded, in one TEXT column.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use calsync_domain::{CalSyncError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

/// Stored form of one encrypted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedData {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    algorithm: String,
}

/// Symmetric cipher for OAuth tokens at rest.
pub struct TokenCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl TokenCipher {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(CalSyncError::Config("token key must be exactly 32 bytes".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CalSyncError::Config(format!("failed to create token cipher: {e}")))?;

        let digest = Sha256::digest(key);
        Ok(Self { cipher, fingerprint: hex::encode(&digest[..4]) })
    }

    /// Create a cipher from the base64 form used in configuration.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let key = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| CalSyncError::Config(format!("token key is not base64: {e}")))?,
        );
        Self::new(&key)
    }

    /// Short, non-reversible key identifier for logs.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt a token into its stored string form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext.as_bytes())
            .map_err(|e| CalSyncError::Security(format!("Encryption failed: {e}")))?;

        let envelope = EncryptedData {
            nonce: nonce_bytes.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
        };
        let serialized = serde_json::to_vec(&envelope)
            .map_err(|e| CalSyncError::Internal(format!("token envelope encoding failed: {e}")))?;
        Ok(BASE64.encode(serialized))
    }

    /// Decrypt a stored token. Any malformed or tampered value is a
    /// `Security` error.
    pub fn decrypt(&self, stored: &str) -> Result<Zeroizing<String>> {
        let decoded = BASE64
            .decode(stored)
            .map_err(|e| CalSyncError::Security(format!("Base64 decode failed: {e}")))?;
        let envelope: EncryptedData = serde_json::from_slice(&decoded)
            .map_err(|e| CalSyncError::Security(format!("Malformed token envelope: {e}")))?;

        if envelope.algorithm != ALGORITHM {
            return Err(CalSyncError::Security(format!(
                "Unsupported algorithm: {}",
                envelope.algorithm
            )));
        }

        let nonce: [u8; NONCE_LEN] = envelope
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| CalSyncError::Security("Nonce must be exactly 12 bytes".into()))?;

        let plaintext = self
            .cipher
            .decrypt(&Nonce::from(nonce), envelope.ciphertext.as_ref())
            .map_err(|_| CalSyncError::Security("Decryption failed".into()))?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| CalSyncError::Security("Decrypted token is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> TokenCipher {
        TokenCipher::new(&[byte; 32]).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt() {
        let cipher = cipher(7);
        let stored = cipher.encrypt("ya29.access-token").unwrap();

        assert!(!stored.contains("ya29"));
        assert_eq!(cipher.decrypt(&stored).unwrap().as_str(), "ya29.access-token");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = cipher(7);
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_with_security_error() {
        let stored = cipher(7).encrypt("secret").unwrap();
        assert!(matches!(cipher(8).decrypt(&stored), Err(CalSyncError::Security(_))));
        assert!(matches!(cipher(7).decrypt("not base64!"), Err(CalSyncError::Security(_))));
    }

    #[test]
    fn rejects_short_keys_and_redacts_debug() {
        assert!(TokenCipher::new(&[1u8; 16]).is_err());
        let rendered = format!("{:?}", cipher(3));
        assert!(rendered.contains("[REDACTED]"));
        assert_eq!(cipher(3).fingerprint().len(), 8);
    }
}
