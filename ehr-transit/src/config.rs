//! Encryption core configuration.

use crate::error::{TransitError, TransitResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

pub const ENV_VAULT_URL: &str = "OPENBAO_URL";
pub const ENV_VAULT_TOKEN: &str = "OPENBAO_TOKEN";
pub const ENV_VAULT_NAMESPACE: &str = "OPENBAO_NAMESPACE";
pub const ENV_VAULT_TIMEOUT: &str = "OPENBAO_TIMEOUT_SECS";
pub const ENV_ENCRYPTION_ENABLED: &str = "ENCRYPTION_ENABLED";
pub const ENV_ENCRYPTION_MODE: &str = "ENCRYPTION_MODE";
pub const ENV_API_BASE_URL: &str = "API_BASE_URL";
pub const ENV_HEALTH_POLL_INTERVAL: &str = "HEALTH_POLL_INTERVAL_SECS";

/// Where session keys come from. Fields are always sealed in-process
/// under the session key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherMode {
    /// The key-management service issues and wraps the session key.
    #[default]
    Remote,
    /// Session keys are generated and wrapped in-process.
    Local,
}

impl std::str::FromStr for CipherMode {
    type Err = TransitError;

    fn from_str(s: &str) -> TransitResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            other => Err(TransitError::Config(format!(
                "unknown encryption mode {other:?} (expected \"remote\" or \"local\")"
            ))),
        }
    }
}

/// Names of the four transit keys forming the dual-key scheme.
///
/// Each side of a transfer owns one symmetric and one asymmetric key, so
/// neither side's private material is ever under the other's control.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNames {
    pub frontend_aes: String,
    pub backend_aes: String,
    pub frontend_rsa: String,
    pub backend_rsa: String,
}

impl Default for KeyNames {
    fn default() -> Self {
        Self {
            frontend_aes: "ehr-aes-master-frontend".to_string(),
            backend_aes: "ehr-aes-master-backend".to_string(),
            frontend_rsa: "ehr-rsa-exchange-frontend".to_string(),
            backend_rsa: "ehr-rsa-exchange-backend".to_string(),
        }
    }
}

impl KeyNames {
    /// Every key that must exist for encryption to be usable.
    pub fn required(&self) -> BTreeSet<String> {
        [
            &self.frontend_aes,
            &self.backend_aes,
            &self.frontend_rsa,
            &self.backend_rsa,
        ]
        .into_iter()
        .cloned()
        .collect()
    }
}

/// Configuration for the transit client, health monitor and orchestrator.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    /// Base URL of the key-management service (e.g. "http://localhost:18200").
    pub vault_url: String,

    /// Service token sent as `X-Vault-Token`. Never serialized.
    #[serde(skip_serializing)]
    pub token: String,

    /// Optional `X-Vault-Namespace`.
    pub namespace: Option<String>,

    /// Kill switch. When false nothing is encrypted and sensitive writes fail.
    pub encryption_enabled: bool,

    pub mode: CipherMode,

    /// Base URL of the EHR backend API.
    pub api_base_url: String,

    /// Upper bound on every remote call.
    pub request_timeout_secs: u64,

    /// Cadence of the background health watcher.
    pub health_poll_interval_secs: u64,

    pub keys: KeyNames,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            vault_url: String::new(),
            token: String::new(),
            namespace: None,
            encryption_enabled: false,
            mode: CipherMode::Remote,
            api_base_url: "http://localhost:3001/api".to_string(),
            request_timeout_secs: 10,
            health_poll_interval_secs: 30,
            keys: KeyNames::default(),
        }
    }
}

impl fmt::Debug for TransitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitConfig")
            .field("vault_url", &self.vault_url)
            .field("token", &"[REDACTED]")
            .field("namespace", &self.namespace)
            .field("encryption_enabled", &self.encryption_enabled)
            .field("mode", &self.mode)
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("health_poll_interval_secs", &self.health_poll_interval_secs)
            .field("keys", &self.keys)
            .finish()
    }
}

impl TransitConfig {
    /// Builds a validated config from the process environment.
    pub fn from_env() -> TransitResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a validated config from an arbitrary variable source.
    ///
    /// A missing service URL or token is an error; there is no insecure
    /// fallback.
    pub fn from_lookup<F>(lookup: F) -> TransitResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let vault_url = var(ENV_VAULT_URL).ok_or_else(|| {
            TransitError::Config(format!("set {ENV_VAULT_URL} to the key-management service URL"))
        })?;
        let token = var(ENV_VAULT_TOKEN).ok_or_else(|| {
            TransitError::Config(format!("set {ENV_VAULT_TOKEN} for key-management authentication"))
        })?;

        let encryption_enabled = var(ENV_ENCRYPTION_ENABLED)
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);

        let mode = var(ENV_ENCRYPTION_MODE)
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or_default();

        let request_timeout_secs = parse_secs(&var, ENV_VAULT_TIMEOUT)?
            .unwrap_or(defaults.request_timeout_secs);
        let health_poll_interval_secs = parse_secs(&var, ENV_HEALTH_POLL_INTERVAL)?
            .unwrap_or(defaults.health_poll_interval_secs);

        let config = Self {
            vault_url,
            token,
            namespace: var(ENV_VAULT_NAMESPACE),
            encryption_enabled,
            mode,
            api_base_url: var(ENV_API_BASE_URL).unwrap_or(defaults.api_base_url),
            request_timeout_secs,
            health_poll_interval_secs,
            keys: KeyNames::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants every client constructor relies on.
    pub fn validate(&self) -> TransitResult<()> {
        if self.vault_url.trim().is_empty() {
            return Err(TransitError::Config("key-management URL is empty".to_string()));
        }
        check_http_url("key-management URL", &self.vault_url)?;
        if self.token.trim().is_empty() {
            return Err(TransitError::Config("key-management token is empty".to_string()));
        }
        check_http_url("API base URL", &self.api_base_url)?;
        if self.request_timeout_secs == 0 {
            return Err(TransitError::Config(
                "request timeout must be at least one second".to_string(),
            ));
        }
        if self.health_poll_interval_secs == 0 {
            return Err(TransitError::Config(
                "health poll interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs)
    }
}

fn parse_secs(var: &impl Fn(&str) -> Option<String>, name: &str) -> TransitResult<Option<u64>> {
    var(name)
        .map(|v| {
            v.parse::<u64>().map_err(|_| {
                TransitError::Config(format!("{name} must be a whole number of seconds"))
            })
        })
        .transpose()
}

fn check_http_url(label: &str, raw: &str) -> TransitResult<()> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| TransitError::Config(format!("{label} {raw:?} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(TransitError::Config(format!(
            "{label} must use http or https, got {scheme}"
        ))),
    }
}

#[cfg(test)]
impl TransitConfig {
    /// A config pointing at a mock service with encryption switched on.
    pub fn test(vault_url: &str) -> Self {
        Self {
            vault_url: vault_url.to_string(),
            token: "test-token".to_string(),
            encryption_enabled: true,
            ..Self::default()
        }
    }
}
