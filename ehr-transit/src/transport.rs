//! Header conventions for encrypted requests and responses.
//!
//! The wrapped session key, the sender's public key and the cipher mode ride
//! in headers. The body carries the tagged fields.

use crate::config::CipherMode;
use crate::error::{TransitError, TransitResult};
use crate::payload::{EncryptedPayload, SealedField};
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;

pub const ENCRYPTED_KEY_HEADER: &str = "x-encrypted-aes-key";
pub const CLIENT_PUBLIC_KEY_HEADER: &str = "x-client-public-key";
pub const ENCRYPTION_ENABLED_HEADER: &str = "x-encryption-enabled";
pub const ENCRYPTION_MODE_HEADER: &str = "x-encryption-mode";
pub const ENCRYPTED_DATA_HEADER: &str = "x-encrypted-data";

/// Key material read off an encrypted response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundKeys {
    pub wrapped_session_key: String,
    /// How the sender sealed the body, when it said so.
    pub mode: Option<CipherMode>,
}

/// Headers announcing an encrypted request.
///
/// The public key PEM is base64-encoded since header values cannot hold
/// newlines.
pub fn attach_encryption_headers(payload: &EncryptedPayload) -> TransitResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ENCRYPTED_KEY_HEADER, header_value(&payload.wrapped_session_key)?);
    headers.insert(
        CLIENT_PUBLIC_KEY_HEADER,
        header_value(&STANDARD.encode(&payload.sender_public_key_ref))?,
    );
    headers.insert(ENCRYPTION_ENABLED_HEADER, HeaderValue::from_static("true"));
    let mode = match payload.mode {
        CipherMode::Remote => "remote",
        CipherMode::Local => "local",
    };
    headers.insert(ENCRYPTION_MODE_HEADER, HeaderValue::from_static(mode));
    Ok(headers)
}

/// Request body for a payload: its tagged fields.
pub fn payload_body(payload: &EncryptedPayload) -> TransitResult<Value> {
    Ok(serde_json::to_value(&payload.fields)?)
}

/// True when the backend flagged the response body as encrypted.
pub fn is_encrypted_response(headers: &HeaderMap) -> bool {
    headers
        .get(ENCRYPTED_DATA_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Reads the wrapped session key and cipher mode from an encrypted
/// response. `Ok(None)` means the response is not encrypted.
pub fn read_encrypted_response(headers: &HeaderMap) -> TransitResult<Option<InboundKeys>> {
    if !is_encrypted_response(headers) {
        return Ok(None);
    }
    let wrapped_session_key = headers
        .get(ENCRYPTED_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            TransitError::UnexpectedResponse(format!(
                "encrypted response without {ENCRYPTED_KEY_HEADER}"
            ))
        })?
        .to_string();

    let mode = match headers.get(ENCRYPTION_MODE_HEADER) {
        None => None,
        Some(raw) => {
            let mode = raw
                .to_str()
                .ok()
                .and_then(|v| v.parse::<CipherMode>().ok())
                .ok_or_else(|| {
                    TransitError::UnexpectedResponse(format!(
                        "{ENCRYPTION_MODE_HEADER} is neither remote nor local"
                    ))
                })?;
            Some(mode)
        }
    };

    Ok(Some(InboundKeys {
        wrapped_session_key,
        mode,
    }))
}

/// Parses a response body of tagged fields.
pub fn read_sealed_fields(body: Value) -> TransitResult<BTreeMap<String, SealedField>> {
    serde_json::from_value(body).map_err(|e| {
        TransitError::UnexpectedResponse(format!("encrypted body is not a field map: {e}"))
    })
}

fn header_value(value: &str) -> TransitResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TransitError::InvalidRecord(format!("value cannot be sent as a header: {e}")))
}
