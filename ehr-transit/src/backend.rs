//! HTTP client for the EHR backend API.

use crate::config::TransitConfig;
use crate::error::{TransitError, TransitResult};
use crate::types::ProbeResult;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// The backend's `{success, message, data}` wrapper.
#[derive(Deserialize)]
struct ApiEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// A decoded backend response.
#[derive(Debug)]
pub struct BackendResponse {
    pub headers: HeaderMap,
    /// `data` from the envelope, or the whole body when it isn't wrapped.
    pub body: Value,
}

#[derive(Debug)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &TransitConfig) -> TransitResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TransitError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`. Any 2xx counts as reachable.
    pub async fn probe(&self) -> ProbeResult {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => ProbeResult {
                success: true,
                message: "backend reachable".to_string(),
            },
            Ok(resp) => ProbeResult {
                success: false,
                message: format!("backend health returned {}", resp.status()),
            },
            Err(e) => {
                warn!("backend probe failed: {e}");
                ProbeResult {
                    success: false,
                    message: format!("backend unreachable: {e}"),
                }
            }
        }
    }

    pub async fn get(&self, path: &str) -> TransitResult<BackendResponse> {
        self.request(Method::GET, path, None, HeaderMap::new()).await
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: &Value,
        headers: HeaderMap,
    ) -> TransitResult<BackendResponse> {
        self.request(method, path, Some(body), headers).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: HeaderMap,
    ) -> TransitResult<BackendResponse> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut builder = self.client.request(method.clone(), url).headers(headers);
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        debug!("backend {method} {path} -> {status}");
        let headers = resp.headers().clone();
        let text = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope>(&text)
                .ok()
                .and_then(|env| env.message)
                .unwrap_or(text);
            return Err(TransitError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                TransitError::UnexpectedResponse(format!(
                    "backend {path} returned invalid JSON: {e}"
                ))
            })?
        };
        let body = unwrap_envelope(value, status.as_u16())?;
        Ok(BackendResponse { headers, body })
    }
}

fn unwrap_envelope(value: Value, status: u16) -> TransitResult<Value> {
    let looks_wrapped = value.as_object().is_some_and(|obj| obj.contains_key("success"));
    if !looks_wrapped {
        return Ok(value);
    }
    let envelope: ApiEnvelope = serde_json::from_value(value)?;
    if !envelope.success {
        return Err(TransitError::Service {
            status,
            message: envelope
                .message
                .unwrap_or_else(|| "backend reported failure".to_string()),
        });
    }
    Ok(envelope.data.unwrap_or(Value::Null))
}
