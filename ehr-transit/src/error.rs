//! Transit client and orchestration error types.

use thiserror::Error;

/// Result type for transit operations.
pub type TransitResult<T> = Result<T, TransitError>;

/// Errors that can occur talking to the key-management service or while
/// encrypting and decrypting records.
#[derive(Debug, Error)]
pub enum TransitError {
    /// Missing or malformed configuration. Fatal; surfaced at construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The service could not be reached or did not answer in time.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-2xx status.
    #[error("service rejected request ({status}): {message}")]
    Service { status: u16, message: String },

    /// A named key does not exist. Implies a provisioning problem.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The health check failed or encryption is switched off.
    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    /// An outbound payload could not be built; nothing was produced.
    #[error("encryption failed: {0}")]
    Encryption(Box<TransitError>),

    /// An inbound record could not be fully decrypted.
    #[error("decryption failed for field {field}: {reason}")]
    Decryption { field: String, reason: String },

    /// A record cannot be encrypted as given (e.g. a sensitive field that is
    /// not text).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("session key unwrap failed: {0}")]
    Unwrap(String),

    /// A 2xx response did not match the endpoint's expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The result belongs to an operation that has since been superseded.
    #[error("stale result discarded: ticket {ticket} superseded by {current}")]
    Superseded { ticket: u64, current: u64 },

    #[error("crypto error: {0}")]
    Crypto(#[from] ehr_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransitError {
    /// True for failures worth retrying later (caller-side policy).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Service { status, .. } => *status >= 500,
            Self::Encryption(inner) => inner.is_transient(),
            _ => false,
        }
    }

    /// Wraps a failure that happened while building an outbound payload.
    pub(crate) fn encryption(err: TransitError) -> Self {
        match err {
            already @ Self::Encryption(_) => already,
            other => Self::Encryption(Box::new(other)),
        }
    }
}

impl From<reqwest::Error> for TransitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::UnexpectedResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Service {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_timeout() {
            return Self::Network(format!("request timed out: {err}"));
        }
        Self::Network(err.to_string())
    }
}
