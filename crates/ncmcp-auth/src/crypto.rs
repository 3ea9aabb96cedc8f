//! Authenticated at-rest encryption for sensitive columns.
//!
//! Sealed blobs are `nonce || ciphertext || tag` with a fresh 12-byte nonce
//! per write. The key comes from the `token_encryption_key` setting as
//! base-64 (standard or url-safe, padded or not) of exactly 32 bytes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use ncmcp_core::{BridgeError, BridgeResult};

const NONCE_LEN: usize = 12;

/// Symmetric cipher for `encrypted_*` columns.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Build a cipher from a base-64 key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the value is not valid base-64 or does not
    /// decode to 32 bytes.
    pub fn from_base64(key_b64: &str) -> BridgeResult<Self> {
        let key_b64 = key_b64.trim();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(key_b64))
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(key_b64))
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(key_b64))
            .map_err(|_| {
                BridgeError::config("token_encryption_key is not valid base-64")
            })?;

        if decoded.len() != 32 {
            return Err(BridgeError::config(format!(
                "token_encryption_key must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&decoded);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generate a fresh key in the accepted configuration format.
    pub fn generate_key_base64() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        base64::engine::general_purpose::STANDARD.encode(key)
    }

    /// Seal a plaintext value for storage.
    pub fn seal(&self, plaintext: &str) -> Vec<u8> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Encryption only fails on absurd plaintext lengths.
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption");

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        blob
    }

    /// Open a sealed blob.
    ///
    /// Wrong-key or corrupt input yields `None`; the caller treats the value
    /// as missing rather than failing the read.
    pub fn open(&self, blob: &[u8]) -> Option<String> {
        if blob.len() <= NONCE_LEN {
            warn!(len = blob.len(), "sealed blob too short to contain a nonce");
            return None;
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        match self.cipher.decrypt(nonce, ciphertext) {
            Ok(plain) => match String::from_utf8(plain) {
                Ok(s) => Some(s),
                Err(_) => {
                    warn!("decrypted blob is not valid UTF-8");
                    None
                }
            },
            Err(_) => {
                warn!("failed to decrypt sealed blob (wrong key or corrupt data)");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_restores_plaintext() {
        let cipher = FieldCipher::from_base64(&FieldCipher::generate_key_base64()).unwrap();
        let sealed = cipher.seal("refresh-token-value");
        assert_eq!(cipher.open(&sealed).as_deref(), Some("refresh-token-value"));
    }

    #[test]
    fn distinct_nonces_per_seal() {
        let cipher = FieldCipher::from_base64(&FieldCipher::generate_key_base64()).unwrap();
        let a = cipher.seal("same");
        let b = cipher.seal("same");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_reads_as_none() {
        let writer = FieldCipher::from_base64(&FieldCipher::generate_key_base64()).unwrap();
        let reader = FieldCipher::from_base64(&FieldCipher::generate_key_base64()).unwrap();
        let sealed = writer.seal("secret");
        assert_eq!(reader.open(&sealed), None);
    }

    #[test]
    fn truncated_blob_reads_as_none() {
        let cipher = FieldCipher::from_base64(&FieldCipher::generate_key_base64()).unwrap();
        assert_eq!(cipher.open(&[0u8; 5]), None);
    }

    #[test]
    fn url_safe_keys_are_accepted() {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let url_safe = base64::engine::general_purpose::URL_SAFE.encode(key);
        assert!(FieldCipher::from_base64(&url_safe).is_ok());
    }

    #[test]
    fn short_key_is_a_config_error() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert!(matches!(
            FieldCipher::from_base64(&short),
            Err(ncmcp_core::BridgeError::Config(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_any_plaintext(plaintext in ".{0,256}") {
            let cipher =
                FieldCipher::from_base64(&FieldCipher::generate_key_base64()).unwrap();
            let sealed = cipher.seal(&plaintext);
            let opened = cipher.open(&sealed);
            proptest::prop_assert_eq!(opened.as_deref(), Some(plaintext.as_str()));
        }
    }
}
