//! AES-256-GCM field cipher.
//!
//! Ciphertext travels as text: `hex(nonce) ":" hex(ciphertext || tag)`.
//! Every call draws a fresh 96-bit nonce, so encrypting the same plaintext
//! twice under one key never yields the same string.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use std::fmt;
use std::str::FromStr;

/// Nonce size for AES-GCM (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-GCM (128 bits).
pub const TAG_SIZE: usize = 16;

const SEPARATOR: char = ':';

/// A parsed `nonce:ciphertext` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedText {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl fmt::Display for SealedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}",
            hex::encode(self.nonce),
            hex::encode(&self.ciphertext)
        )
    }
}

impl FromStr for SealedText {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        let (nonce_hex, body_hex) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| CryptoError::Decryption("missing nonce separator".to_string()))?;

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|e| CryptoError::Decryption(format!("nonce is not valid hex: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::Decryption(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            )));
        }

        let ciphertext = hex::decode(body_hex)
            .map_err(|e| CryptoError::Decryption(format!("ciphertext is not valid hex: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption(
                "ciphertext shorter than authentication tag".to_string(),
            ));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&nonce_bytes);
        Ok(Self { nonce, ciphertext })
    }
}

fn cipher_for(key: &SymmetricKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypts raw bytes under `key`.
pub fn encrypt_bytes(plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<SealedText> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher_for(key)
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    Ok(SealedText {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts a sealed payload, verifying the GCM tag.
pub fn decrypt_bytes(sealed: &SealedText, key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
    cipher_for(key)
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| {
            CryptoError::Decryption(
                "authentication failed (wrong key or tampered data)".to_string(),
            )
        })
}

/// Encrypts a UTF-8 string, returning the `nonce:ciphertext` text form.
pub fn encrypt(plaintext: &str, key: &SymmetricKey) -> CryptoResult<String> {
    Ok(encrypt_bytes(plaintext.as_bytes(), key)?.to_string())
}

/// Decrypts the `nonce:ciphertext` text form back to a UTF-8 string.
pub fn decrypt(ciphertext: &str, key: &SymmetricKey) -> CryptoResult<String> {
    let sealed: SealedText = ciphertext.parse()?;
    let bytes = decrypt_bytes(&sealed, key)?;
    String::from_utf8(bytes)
        .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
}
