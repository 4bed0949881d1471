//! Local encryption primitives for EHR record fields.
//!
//! Two building blocks, neither of which makes network calls:
//!
//! 1. **Field cipher** ([`cipher`]): AES-256-GCM under a 256-bit session key,
//!    emitted as `hex(nonce):hex(ciphertext)` text so it can sit in a JSON
//!    record field.
//!
//! 2. **Key wrap** ([`keywrap`]): RSA-OAEP (SHA-256) for carrying the session
//!    key to the other side of a transfer. Each side owns its own key pair;
//!    the private half never leaves the process that generated it.
//!
//! Every failure is returned as a [`CryptoError`]; nothing here falls back to
//! plaintext.

pub mod cipher;
mod error;
mod key;
pub mod keywrap;

pub use cipher::{decrypt, decrypt_bytes, encrypt, encrypt_bytes, SealedText, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{generate_key, SymmetricKey, KEY_SIZE};
pub use keywrap::{generate_key_pair, wrap, PublicKey, SessionKeyPair, RSA_BITS};
