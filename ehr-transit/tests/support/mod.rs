//! Shared helpers for tests against a mocked transit service.
#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::STANDARD};
use ehr_transit::{KeyNames, TransitConfig};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Config pointing at `server` with encryption switched on.
pub fn config(server: &MockServer) -> TransitConfig {
    TransitConfig {
        vault_url: server.uri(),
        token: "test-token".into(),
        encryption_enabled: true,
        api_base_url: format!("{}/api", server.uri()),
        request_timeout_secs: 2,
        ..TransitConfig::default()
    }
}

pub fn all_key_names() -> Vec<String> {
    KeyNames::default().required().into_iter().collect()
}

pub async fn mount_key_list(server: &MockServer, keys: &[String]) {
    Mock::given(method("GET"))
        .and(path("/v1/transit/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"keys": keys}})))
        .mount(server)
        .await;
}

/// Serves `pem` as version 1 of an RSA key.
pub async fn mount_public_key(server: &MockServer, name: &str, pem: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/transit/keys/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "name": name,
                "type": "rsa-2048",
                "latest_version": 1,
                "keys": {"1": {"public_key": pem, "creation_time": "2024-01-01T00:00:00Z"}}
            }
        })))
        .mount(server)
        .await;
}

/// Stand-in transit engine. Ciphertext is `vault:v1:<key>|<base64>`, so a
/// value only opens under the key that produced it; any other key gets the
/// service's authentication failure.
pub struct EchoTransit;

impl Respond for EchoTransit {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let segments: Vec<&str> = request.url.path().split('/').collect();
        let op = segments.get(3).copied().unwrap_or_default();
        let key = segments.last().copied().unwrap_or_default();
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);

        match op {
            "encrypt" | "wrap" => {
                let plaintext = body["plaintext"].as_str().unwrap_or_default();
                data(json!({"ciphertext": bound(key, plaintext)}))
            }
            "decrypt" | "unwrap" => {
                let ciphertext = body["ciphertext"].as_str().unwrap_or_default();
                match ciphertext
                    .strip_prefix("vault:v1:")
                    .and_then(|rest| rest.split_once('|'))
                {
                    Some((owner, plaintext)) if owner == key => {
                        data(json!({"plaintext": plaintext}))
                    }
                    Some(_) => rejected("cipher: message authentication failed"),
                    None => rejected("invalid ciphertext: no version prefix"),
                }
            }
            "datakey" => {
                let raw = STANDARD.encode(DATA_KEY);
                let mut out = json!({"ciphertext": bound(key, &raw)});
                if segments.get(4) == Some(&"plaintext") {
                    out["plaintext"] = json!(raw);
                }
                data(out)
            }
            _ => ResponseTemplate::new(404).set_body_json(json!({"errors": []})),
        }
    }
}

/// Key material handed out by the stand-in engine's data key endpoint.
pub const DATA_KEY: [u8; 32] = [7u8; 32];

fn bound(key: &str, encoded: &str) -> String {
    format!("vault:v1:{key}|{encoded}")
}

/// What the stand-in engine returns when `key` encrypts or wraps `plaintext`.
pub fn sealed_for(key: &str, plaintext: impl AsRef<[u8]>) -> String {
    bound(key, &STANDARD.encode(plaintext))
}

/// Opens a stand-in ciphertext as the holder of `key` would.
pub fn opened_by(key: &str, ciphertext: &str) -> Option<Vec<u8>> {
    let (owner, encoded) = ciphertext.strip_prefix("vault:v1:")?.split_once('|')?;
    if owner != key {
        return None;
    }
    STANDARD.decode(encoded).ok()
}

fn rejected(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({"errors": [message]}))
}

fn data(inner: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"data": inner}))
}

pub async fn mount_echo_transit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/transit/(encrypt|decrypt|wrap|unwrap|datakey)/.+$"))
        .respond_with(EchoTransit)
        .mount(server)
        .await;
}

/// Everything a healthy service needs: the full key list, key-bound crypto
/// and public keys for both RSA keys.
pub async fn mount_healthy_service(server: &MockServer, backend_pem: &str, frontend_pem: &str) {
    let keys = KeyNames::default();
    mount_key_list(server, &all_key_names()).await;
    mount_echo_transit(server).await;
    mount_public_key(server, &keys.backend_rsa, backend_pem).await;
    mount_public_key(server, &keys.frontend_rsa, frontend_pem).await;
}

pub fn record(value: Value) -> ehr_transit::Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
