//! Envelope encryption for provider secrets stored in the settings database.
//!
//! A 32-byte key is derived with PBKDF2-HMAC-SHA256 from the process secret
//! (`MUSE_ENCRYPTION_SECRET`, with a fixed development fallback) and a fixed
//! salt so the key is stable across restarts. Values are sealed with AES-GCM
//! and stored as base64 of `nonce || ciphertext`.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{MuseError, Result};

const SALT: &[u8] = b"muse_salt_v1";
const PBKDF2_ROUNDS: u32 = 100_000;
const NONCE_LEN: usize = 12;

fn derive_key() -> [u8; 32] {
    let secret = std::env::var("MUSE_ENCRYPTION_SECRET")
        .unwrap_or_else(|_| "muse-default-secret-change-in-production".to_string());
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), SALT, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt an API key for storage. Empty input stays empty.
pub fn encrypt_api_key(api_key: &str) -> Result<String> {
    if api_key.is_empty() {
        return Ok(String::new());
    }
    let key = derive_key();
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, api_key.as_bytes())
        .map_err(|e| MuseError::Crypto(format!("encrypt failed: {e}")))?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(envelope))
}

/// Decrypt a stored API key. Empty input stays empty.
pub fn decrypt_api_key(enveloped: &str) -> Result<String> {
    if enveloped.is_empty() {
        return Ok(String::new());
    }
    let data = URL_SAFE_NO_PAD
        .decode(enveloped)
        .map_err(|e| MuseError::Crypto(format!("invalid envelope encoding: {e}")))?;
    if data.len() <= NONCE_LEN {
        return Err(MuseError::Crypto("envelope too short".to_string()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let key = derive_key();
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| MuseError::Crypto(format!("decrypt failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| MuseError::Crypto(format!("invalid utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let sealed = encrypt_api_key("sk-test-12345").unwrap();
        assert_ne!(sealed, "sk-test-12345");
        assert_eq!(decrypt_api_key(&sealed).unwrap(), "sk-test-12345");
    }

    #[test]
    fn empty_passes_through() {
        assert_eq!(encrypt_api_key("").unwrap(), "");
        assert_eq!(decrypt_api_key("").unwrap(), "");
    }

    #[test]
    fn distinct_nonces_per_call() {
        let a = encrypt_api_key("same").unwrap();
        let b = encrypt_api_key("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_envelope_fails() {
        let sealed = encrypt_api_key("sk-secret").unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert!(decrypt_api_key(&tampered).is_err());
    }
}
