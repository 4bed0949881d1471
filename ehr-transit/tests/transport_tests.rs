use ehr_transit::transport::{
    self, CLIENT_PUBLIC_KEY_HEADER, ENCRYPTED_DATA_HEADER, ENCRYPTED_KEY_HEADER,
    ENCRYPTION_ENABLED_HEADER, ENCRYPTION_MODE_HEADER,
};
use ehr_transit::{CipherMode, EncryptedPayload, SealedField, TransitError};
use pretty_assertions::assert_eq;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::collections::BTreeMap;

const PEM: &str = "-----BEGIN PUBLIC KEY-----\nMIIBIjAN\n-----END PUBLIC KEY-----\n";

fn payload() -> EncryptedPayload {
    EncryptedPayload {
        fields: BTreeMap::from([
            ("patient".to_string(), SealedField::Plaintext(json!("p1"))),
            ("diagnosis".to_string(), SealedField::Ciphertext("vault:v1:abc".into())),
        ]),
        wrapped_session_key: "vault:v1:wrapped".into(),
        sender_wrapped_session_key: None,
        sender_public_key_ref: PEM.into(),
        mode: CipherMode::Remote,
    }
}

#[test]
fn outbound_headers() {
    let headers = transport::attach_encryption_headers(&payload()).unwrap();
    assert_eq!(headers[ENCRYPTED_KEY_HEADER], "vault:v1:wrapped");
    assert_eq!(headers[ENCRYPTION_ENABLED_HEADER], "true");
    assert_eq!(headers[ENCRYPTION_MODE_HEADER], "remote");
    assert!(!headers[CLIENT_PUBLIC_KEY_HEADER].to_str().unwrap().contains('\n'));
}

#[test]
fn headers_carry_keys_back_in() {
    let mut headers = transport::attach_encryption_headers(&payload()).unwrap();
    headers.insert(ENCRYPTED_DATA_HEADER, HeaderValue::from_static("true"));

    let keys = transport::read_encrypted_response(&headers).unwrap().unwrap();
    assert_eq!(keys.wrapped_session_key, "vault:v1:wrapped");
    assert_eq!(keys.mode, Some(CipherMode::Remote));
}

#[test]
fn unflagged_response_is_not_encrypted() {
    let headers = transport::attach_encryption_headers(&payload()).unwrap();
    assert!(!transport::is_encrypted_response(&headers));
    assert_eq!(transport::read_encrypted_response(&headers).unwrap(), None);
}

#[test]
fn flagged_response_without_key_is_rejected() {
    let mut headers = HeaderMap::new();
    headers.insert(ENCRYPTED_DATA_HEADER, HeaderValue::from_static("TRUE"));
    assert!(matches!(
        transport::read_encrypted_response(&headers),
        Err(TransitError::UnexpectedResponse(_))
    ));
}

#[test]
fn missing_mode_header_leaves_mode_open() {
    let mut headers = HeaderMap::new();
    headers.insert(ENCRYPTED_DATA_HEADER, HeaderValue::from_static("true"));
    headers.insert(ENCRYPTED_KEY_HEADER, HeaderValue::from_static("vault:v1:k"));

    let keys = transport::read_encrypted_response(&headers).unwrap().unwrap();
    assert_eq!(keys.mode, None);

    headers.insert(ENCRYPTION_MODE_HEADER, HeaderValue::from_static("Local"));
    let keys = transport::read_encrypted_response(&headers).unwrap().unwrap();
    assert_eq!(keys.mode, Some(CipherMode::Local));
}

#[test]
fn unknown_mode_header_is_rejected() {
    let mut headers = HeaderMap::new();
    headers.insert(ENCRYPTED_DATA_HEADER, HeaderValue::from_static("true"));
    headers.insert(ENCRYPTED_KEY_HEADER, HeaderValue::from_static("vault:v1:k"));
    headers.insert(ENCRYPTION_MODE_HEADER, HeaderValue::from_static("hybrid"));
    assert!(matches!(
        transport::read_encrypted_response(&headers),
        Err(TransitError::UnexpectedResponse(_))
    ));
}

#[test]
fn body_is_tagged_fields() {
    let body = transport::payload_body(&payload()).unwrap();
    assert_eq!(
        body,
        json!({
            "diagnosis": {"kind": "ciphertext", "value": "vault:v1:abc"},
            "patient": {"kind": "plaintext", "value": "p1"}
        })
    );
    assert_eq!(transport::read_sealed_fields(body).unwrap(), payload().fields);
}

#[test]
fn untagged_body_is_rejected() {
    let err = transport::read_sealed_fields(json!({"diagnosis": "vault:v1:abc"})).unwrap_err();
    assert!(matches!(err, TransitError::UnexpectedResponse(_)));
}

#[test]
fn payload_json_omits_absent_sender_wrap() {
    let value = serde_json::to_value(payload()).unwrap();
    assert!(value.get("sender_wrapped_session_key").is_none());
    assert_eq!(value["mode"], "remote");
}
