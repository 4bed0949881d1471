//! RSA-OAEP key wrapping.
//!
//! Session keys are wrapped with RSA-OAEP (SHA-256) and carried as base64.
//! A 2048-bit modulus can wrap at most 190 bytes, which comfortably covers a
//! 32-byte symmetric key or its 64-character hex form.

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::aead::OsRng;
use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Modulus size used for generated session key pairs.
pub const RSA_BITS: usize = 2048;

/// SHA-256 digest length, used in the OAEP overhead calculation.
const OAEP_HASH_LEN: usize = 32;

/// An RSA public key used to wrap session keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parses a PEM public key, accepting SPKI (`BEGIN PUBLIC KEY`) and
    /// PKCS#1 (`BEGIN RSA PUBLIC KEY`) encodings.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let pem = pem.trim();
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(format!("unreadable RSA public key: {e}")))
    }

    /// Exports the key as SPKI PEM.
    pub fn to_pem(&self) -> CryptoResult<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(format!("public key export failed: {e}")))
    }

    /// Largest plaintext this key can wrap with OAEP-SHA256.
    pub fn max_wrap_len(&self) -> usize {
        self.0.size().saturating_sub(2 * OAEP_HASH_LEN + 2)
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }
}

/// An ephemeral RSA key pair owned by the process that generated it.
///
/// The private half never appears in `Debug` output and is not serializable;
/// it only leaves the process through [`SessionKeyPair::export_private_key_pem`].
pub struct SessionKeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl SessionKeyPair {
    /// Generates a fresh 2048-bit pair.
    pub fn generate() -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = PublicKey(RsaPublicKey::from(&private));
        Ok(Self { private, public })
    }

    /// Restores a pair from a PEM private key, accepting PKCS#8
    /// (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`) encodings.
    pub fn from_private_key_pem(pem: &str) -> CryptoResult<Self> {
        let pem = pem.trim();
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(format!("unreadable RSA private key: {e}")))?;
        let public = PublicKey(RsaPublicKey::from(&private));
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_pem(&self) -> CryptoResult<String> {
        self.public.to_pem()
    }

    /// Exports the private key as PKCS#8 PEM.
    pub fn export_private_key_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(format!("private key export failed: {e}")))
    }

    /// Unwraps a key that was wrapped for this pair's public key.
    pub fn unwrap(&self, wrapped: &str) -> CryptoResult<Zeroizing<Vec<u8>>> {
        unwrap(wrapped, &self.private)
    }
}

impl std::fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyPair")
            .field("public_bits", &self.public.bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Generates a fresh session key pair.
pub fn generate_key_pair() -> CryptoResult<SessionKeyPair> {
    SessionKeyPair::generate()
}

/// Wraps `key_bytes` under `public_key`, returning base64.
pub fn wrap(key_bytes: &[u8], public_key: &PublicKey) -> CryptoResult<String> {
    let limit = public_key.max_wrap_len();
    if key_bytes.len() > limit {
        return Err(CryptoError::Wrap(format!(
            "{} bytes exceeds the {limit}-byte OAEP limit for a {}-bit key",
            key_bytes.len(),
            public_key.bits()
        )));
    }

    let wrapped = public_key
        .0
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key_bytes)
        .map_err(|e| CryptoError::Wrap(e.to_string()))?;
    Ok(STANDARD.encode(wrapped))
}

/// Reverses [`wrap`] with the matching private key.
pub fn unwrap(wrapped: &str, private_key: &RsaPrivateKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let ciphertext = STANDARD
        .decode(wrapped.trim())
        .map_err(|e| CryptoError::Unwrap(format!("wrapped key is not valid base64: {e}")))?;

    private_key
        .decrypt(Oaep::new::<Sha256>(), &ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| {
            CryptoError::Unwrap("OAEP verification failed (wrong key or tampered data)".to_string())
        })
}
