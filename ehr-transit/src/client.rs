//! HTTP client for the transit key-management API.
//!
//! Hides the wire details (token and namespace headers, base64 plaintext
//! bodies, the `{data: {...}}` envelope) behind typed operations. Every
//! request carries the configured timeout; nothing is retried here.

use crate::config::TransitConfig;
use crate::error::{TransitError, TransitResult};
use crate::types::{DataKey, KeyMetadata};
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::{debug, warn};
use zeroize::Zeroizing;

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const TRANSIT_MOUNT: &str = "transit";

/// Prefix the service puts on every ciphertext it produces (`vault:v1:...`).
pub const CIPHERTEXT_PREFIX: &str = "vault:v";

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct KeyListData {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct CiphertextData {
    ciphertext: String,
}

#[derive(Deserialize)]
struct PlaintextData {
    plaintext: String,
}

#[derive(Deserialize)]
struct DataKeyData {
    ciphertext: Option<String>,
    plaintext: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<String>,
}

/// Client for a transit-style key-management service.
///
/// Stateless apart from the connection pool; share it behind an `Arc`.
pub struct TransitClient {
    client: Client,
    base_url: String,
    token: String,
    namespace: Option<String>,
}

impl std::fmt::Debug for TransitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitClient")
            .field("base_url", &self.base_url)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl TransitClient {
    /// Builds a client, failing fast on missing URL or token.
    pub fn new(config: &TransitConfig) -> TransitResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TransitError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("{}/v1", config.vault_url.trim_end_matches('/')),
            token: config.token.clone(),
            namespace: config.namespace.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Keys ──

    /// Lists key names, returning an empty set on any failure.
    ///
    /// Status probes call this; it logs instead of erroring.
    pub async fn list_keys(&self) -> BTreeSet<String> {
        match self.try_list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("failed to list transit keys: {e}");
                BTreeSet::new()
            }
        }
    }

    /// Lists key names, surfacing failures. A 404 means no keys exist yet.
    pub async fn try_list_keys(&self) -> TransitResult<BTreeSet<String>> {
        let path = format!("{TRANSIT_MOUNT}/keys");
        let resp = self.send(Method::GET, &path, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("transit key list is empty");
            return Ok(BTreeSet::new());
        }
        let data: KeyListData = Self::read_data(resp, &path, None).await?;
        Ok(data.keys.into_iter().collect())
    }

    /// Fetches metadata for a named key.
    pub async fn get_key_info(&self, key_name: &str) -> TransitResult<KeyMetadata> {
        let path = format!("{TRANSIT_MOUNT}/keys/{}", checked_key_name(key_name)?);
        let mut info: KeyMetadata = self.call(Method::GET, &path, None, Some(key_name)).await?;
        if info.name.is_empty() {
            info.name = key_name.to_string();
        }
        if info.latest_version == 0 {
            info.latest_version = info.newest_version().unwrap_or(0);
        }
        Ok(info)
    }

    /// Returns the PEM public key of the highest numeric key version.
    pub async fn get_public_key(&self, key_name: &str) -> TransitResult<String> {
        let info = self.get_key_info(key_name).await?;
        let (version, pem) = info.latest_public_key().ok_or_else(|| {
            TransitError::UnexpectedResponse(format!("key {key_name} exposes no public key"))
        })?;
        debug!("resolved public key {key_name} at version {version}");
        Ok(pem.to_string())
    }

    // ── Data ──

    /// Encrypts `plaintext` under a named key. The returned ciphertext is
    /// opaque and carries the service's version prefix.
    pub async fn encrypt(
        &self,
        key_name: &str,
        plaintext: impl AsRef<[u8]>,
    ) -> TransitResult<String> {
        self.seal("encrypt", key_name, plaintext.as_ref()).await
    }

    pub async fn decrypt(
        &self,
        key_name: &str,
        ciphertext: &str,
    ) -> TransitResult<Zeroizing<Vec<u8>>> {
        self.open("decrypt", key_name, ciphertext).await
    }

    /// [`decrypt`](Self::decrypt) for text payloads.
    pub async fn decrypt_string(&self, key_name: &str, ciphertext: &str) -> TransitResult<String> {
        let bytes = self.decrypt(key_name, ciphertext).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            TransitError::UnexpectedResponse(format!("plaintext from {key_name} is not UTF-8"))
        })
    }

    // ── Key material ──

    pub async fn wrap_key(
        &self,
        key_name: &str,
        plaintext: impl AsRef<[u8]>,
    ) -> TransitResult<String> {
        self.seal("wrap", key_name, plaintext.as_ref()).await
    }

    pub async fn unwrap_key(
        &self,
        key_name: &str,
        ciphertext: &str,
    ) -> TransitResult<Zeroizing<Vec<u8>>> {
        self.open("unwrap", key_name, ciphertext).await
    }

    /// Generates a data key under a named key.
    ///
    /// With `return_plaintext == false` only the wrapped form comes back and
    /// the raw key never leaves the service.
    pub async fn generate_data_key(
        &self,
        key_name: &str,
        return_plaintext: bool,
    ) -> TransitResult<DataKey> {
        let kind = if return_plaintext { "plaintext" } else { "wrapped" };
        let path = format!("{TRANSIT_MOUNT}/datakey/{kind}/{}", checked_key_name(key_name)?);
        let data: DataKeyData = self.call(Method::POST, &path, None, Some(key_name)).await?;

        let ciphertext = data.ciphertext.ok_or_else(|| {
            TransitError::UnexpectedResponse(format!("data key for {key_name} has no ciphertext"))
        })?;
        let plaintext = match (return_plaintext, data.plaintext) {
            (true, Some(encoded)) => Some(decode_plaintext(&encoded, key_name)?),
            (true, None) => {
                return Err(TransitError::UnexpectedResponse(format!(
                    "plaintext data key for {key_name} was not returned"
                )));
            }
            (false, _) => None,
        };

        Ok(DataKey { ciphertext, plaintext })
    }

    // ── Wire ──

    async fn seal(&self, op: &str, key_name: &str, plaintext: &[u8]) -> TransitResult<String> {
        let path = format!("{TRANSIT_MOUNT}/{op}/{}", checked_key_name(key_name)?);
        let body = json!({ "plaintext": STANDARD.encode(plaintext) });
        let data: CiphertextData =
            self.call(Method::POST, &path, Some(&body), Some(key_name)).await?;
        Ok(data.ciphertext)
    }

    async fn open(
        &self,
        op: &str,
        key_name: &str,
        ciphertext: &str,
    ) -> TransitResult<Zeroizing<Vec<u8>>> {
        let path = format!("{TRANSIT_MOUNT}/{op}/{}", checked_key_name(key_name)?);
        let body = json!({ "ciphertext": ciphertext });
        let data: PlaintextData =
            self.call(Method::POST, &path, Some(&body), Some(key_name)).await?;
        let plaintext = Zeroizing::new(data.plaintext);
        decode_plaintext(&plaintext, key_name)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        key_name: Option<&str>,
    ) -> TransitResult<T> {
        let resp = self.send(method, path, body).await?;
        Self::read_data(resp, path, key_name).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> TransitResult<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self
            .client
            .request(method.clone(), url)
            .header(TOKEN_HEADER, &self.token);
        if let Some(namespace) = &self.namespace {
            builder = builder.header(NAMESPACE_HEADER, namespace);
        }
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let resp = builder.send().await?;
        debug!("{method} /v1/{path} -> {}", resp.status());
        Ok(resp)
    }

    async fn read_data<T: DeserializeOwned>(
        resp: reqwest::Response,
        path: &str,
        key_name: Option<&str>,
    ) -> TransitResult<T> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(name) = key_name {
                return Err(TransitError::KeyNotFound(name.to_string()));
            }
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransitError::Service {
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }

        let text = resp.text().await?;
        let envelope: DataEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
            TransitError::UnexpectedResponse(format!("malformed response from /v1/{path}: {e}"))
        })?;
        Ok(envelope.data)
    }
}

/// Rejects key names that could escape their path segment.
fn checked_key_name(key_name: &str) -> TransitResult<&str> {
    let valid = !key_name.is_empty()
        && key_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && key_name != "."
        && key_name != "..";
    if valid {
        Ok(key_name)
    } else {
        Err(TransitError::Config(format!("invalid key name {key_name:?}")))
    }
}

fn decode_plaintext(encoded: &str, key_name: &str) -> TransitResult<Zeroizing<Vec<u8>>> {
    STANDARD.decode(encoded.as_bytes()).map(Zeroizing::new).map_err(|e| {
        TransitError::UnexpectedResponse(format!("plaintext from {key_name} is not base64: {e}"))
    })
}

fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if !parsed.errors.is_empty() {
            return parsed.errors.join("; ");
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_name_validation() {
        assert!(checked_key_name("ehr-aes-master-frontend").is_ok());
        assert!(checked_key_name("key_v2.backup").is_ok());
        assert!(checked_key_name("").is_err());
        assert!(checked_key_name("..").is_err());
        assert!(checked_key_name("a/b").is_err());
        assert!(checked_key_name("a?b").is_err());
    }

    #[test]
    fn vault_error_body_is_joined() {
        let body = r#"{"errors":["permission denied","bad token"]}"#;
        let msg = error_message(body, StatusCode::FORBIDDEN);
        assert_eq!(msg, "permission denied; bad token");
    }

    #[test]
    fn empty_error_body_uses_reason() {
        assert_eq!(error_message("", StatusCode::BAD_GATEWAY), "Bad Gateway");
    }

    #[test]
    fn client_requires_token() {
        let mut config = TransitConfig::test("http://127.0.0.1:8200");
        config.token.clear();
        assert!(matches!(TransitClient::new(&config), Err(TransitError::Config(_))));
    }

    #[test]
    fn base_url_gets_api_prefix() {
        let client = TransitClient::new(&TransitConfig::test("http://127.0.0.1:8200/")).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8200/v1");
    }
}
