//! At-rest protection for long-lived provider credentials
//!
//! Tokens are AES-GCM sealed with a key taken from configuration. The key may
//! be given as hex or base64 and must decode to 16, 24 or 32 bytes, selecting
//! AES-128, AES-192 or AES-256 respectively.
//!
//! Stored format: `base64(nonce[12] || ciphertext || tag)`, no associated data.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

use crate::error::{FootprintError, Result};

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

type Aes192Gcm = AesGcm<Aes192, U12>;

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn from_key(key: &[u8]) -> Result<Self> {
        let invalid = |_| FootprintError::Config("Invalid encryption key".to_string());
        match key.len() {
            16 => Ok(Cipher::Aes128(Aes128Gcm::new_from_slice(key).map_err(invalid)?)),
            24 => Ok(Cipher::Aes192(Aes192Gcm::new_from_slice(key).map_err(invalid)?)),
            32 => Ok(Cipher::Aes256(Aes256Gcm::new_from_slice(key).map_err(invalid)?)),
            n => Err(FootprintError::Config(format!(
                "Encryption key must be 16, 24, or 32 bytes, got {}",
                n
            ))),
        }
    }

    fn seal(&self, nonce: &Nonce<U12>, plaintext: &[u8]) -> std::result::Result<Vec<u8>, aes_gcm::Error> {
        match self {
            Cipher::Aes128(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes192(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes256(c) => c.encrypt(nonce, plaintext),
        }
    }

    fn open(&self, nonce: &Nonce<U12>, ciphertext: &[u8]) -> std::result::Result<Vec<u8>, aes_gcm::Error> {
        match self {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes192(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
    }
}

/// Decode a configured key, accepting hex (32 or 64 digits) or base64
pub fn decode_key(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FootprintError::Config(
            "ENCRYPTION_KEY is required".to_string(),
        ));
    }

    let looks_hex = matches!(raw.len(), 32 | 48 | 64) && raw.chars().all(|c| c.is_ascii_hexdigit());
    let key = if looks_hex {
        hex::decode(raw)
            .map_err(|e| FootprintError::Config(format!("Invalid ENCRYPTION_KEY format: {}", e)))?
    } else {
        BASE64
            .decode(raw)
            .map_err(|e| FootprintError::Config(format!("Invalid ENCRYPTION_KEY format: {}", e)))?
    };

    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(FootprintError::Config(format!(
            "ENCRYPTION_KEY must be 16, 24, or 32 bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

/// Fresh random 256-bit key, base64 encoded, suitable for `ENCRYPTION_KEY`
pub fn generate_key() -> String {
    BASE64.encode(Aes256Gcm::generate_key(&mut OsRng))
}

/// Authenticated-encryption wrapper for stored refresh tokens
///
/// Holds only the raw configured key string; the key is decoded and validated
/// on every call, so a bad key fails before any cryptographic work. The vault
/// is immutable and safe to share across tasks.
#[derive(Clone)]
pub struct SecretVault {
    key_material: String,
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}

impl SecretVault {
    pub fn new(key_material: impl Into<String>) -> Self {
        Self {
            key_material: key_material.into(),
        }
    }

    fn cipher(&self) -> Result<Cipher> {
        let key = decode_key(&self.key_material)?;
        Cipher::from_key(&key)
    }

    /// Seal `plaintext` under a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .seal(&nonce, plaintext)
            .map_err(|e| FootprintError::Config(format!("AES-GCM encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(nonce.as_slice());
        combined.extend_from_slice(&ciphertext);

        debug!(
            "Sealed secret (plaintext_len: {}, token_len: {})",
            plaintext.len(),
            combined.len()
        );
        Ok(BASE64.encode(&combined))
    }

    /// Open a token produced by [`SecretVault::encrypt`]
    ///
    /// Undecodable, truncated or tampered tokens fail with
    /// [`FootprintError::Authentication`].
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;

        let combined = BASE64.decode(token.trim()).map_err(|e| {
            FootprintError::Authentication(format!("Stored token is not valid base64: {}", e))
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(FootprintError::Authentication(format!(
                "Stored token too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::<U12>::from_slice(nonce_bytes);

        cipher.open(nonce, ciphertext).map_err(|_| {
            FootprintError::Authentication(
                "AES-GCM tag mismatch (token corrupted or key changed)".to_string(),
            )
        })
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, token: &str) -> Result<String> {
        let bytes = self.decrypt(token)?;
        String::from_utf8(bytes).map_err(|e| {
            FootprintError::Authentication(format!("Decrypted data is not valid UTF-8: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn vault() -> SecretVault {
        SecretVault::new(HEX_KEY)
    }

    #[test]
    fn test_encrypt_decrypt() {
        let vault = vault();
        let token = vault.encrypt_str("1//0refresh-token").unwrap();
        assert_ne!(token, "1//0refresh-token");
        assert!(BASE64.decode(&token).is_ok());
        assert_eq!(vault.decrypt_str(&token).unwrap(), "1//0refresh-token");
    }

    #[test]
    fn test_empty_plaintext_round_trips() {
        let vault = vault();
        let token = vault.encrypt(b"").unwrap();
        // nonce + 16-byte tag
        assert_eq!(BASE64.decode(&token).unwrap().len(), NONCE_SIZE + 16);
        assert_eq!(vault.decrypt(&token).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_same_plaintext_different_tokens() {
        let vault = vault();
        let a = vault.encrypt_str("same").unwrap();
        let b = vault.encrypt_str("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_all_key_sizes_and_encodings() {
        let keys = [
            "000102030405060708090a0b0c0d0e0f".to_string(),
            BASE64.encode([7u8; 16]),
            BASE64.encode([7u8; 24]),
            "000102030405060708090a0b0c0d0e0f1011121314151617".to_string(),
            BASE64.encode([9u8; 32]),
            HEX_KEY.to_string(),
        ];
        for key in keys {
            let vault = SecretVault::new(key.clone());
            let token = vault.encrypt_str("secret").unwrap();
            assert_eq!(vault.decrypt_str(&token).unwrap(), "secret", "key {}", key);
        }
    }

    #[test]
    fn test_generated_key_is_usable() {
        let key = generate_key();
        assert_eq!(decode_key(&key).unwrap().len(), 32);
        assert_ne!(key, generate_key());
        let vault = SecretVault::new(key);
        let token = vault.encrypt_str("secret").unwrap();
        assert_eq!(vault.decrypt_str(&token).unwrap(), "secret");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = SecretVault::new("").encrypt_str("secret").unwrap_err();
        assert!(matches!(err, FootprintError::Config(_)));
    }

    #[test]
    fn test_wrong_key_length_is_config_error() {
        let err = SecretVault::new(BASE64.encode([1u8; 20]))
            .encrypt_str("secret")
            .unwrap_err();
        assert!(matches!(err, FootprintError::Config(_)));
        assert!(err.to_string().contains("16, 24, or 32"));
    }

    #[test]
    fn test_malformed_key_is_config_error() {
        let err = SecretVault::new("not a key!").decrypt("AAAA").unwrap_err();
        assert!(matches!(err, FootprintError::Config(_)));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let token = vault().encrypt_str("secret").unwrap();
        let other = SecretVault::new(BASE64.encode([3u8; 32]));
        let err = other.decrypt(&token).unwrap_err();
        assert!(matches!(err, FootprintError::Authentication(_)));
    }

    #[test]
    fn test_truncated_token_fails_authentication() {
        let err = vault().decrypt(&BASE64.encode([0u8; 5])).unwrap_err();
        assert!(matches!(err, FootprintError::Authentication(_)));
    }

    proptest! {
        #[test]
        fn prop_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let vault = vault();
            let token = vault.encrypt(&data).unwrap();
            prop_assert_eq!(vault.decrypt(&token).unwrap(), data);
        }

        #[test]
        fn prop_flipping_any_byte_fails_authentication(
            data in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<proptest::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let vault = vault();
            let token = vault.encrypt(&data).unwrap();
            let mut raw = BASE64.decode(&token).unwrap();
            let i = index.index(raw.len());
            raw[i] ^= mask;
            let err = vault.decrypt(&BASE64.encode(&raw)).unwrap_err();
            prop_assert!(matches!(err, FootprintError::Authentication(_)));
        }
    }
}
