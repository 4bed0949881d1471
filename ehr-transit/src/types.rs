//! Shared types for key-management and health operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use zeroize::Zeroizing;

/// Key algorithm as reported by the transit service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyType {
    #[default]
    Aes256Gcm96,
    Rsa2048,
    Rsa4096,
    /// Any kind this client does not special-case, preserved verbatim.
    Other(String),
}

impl KeyType {
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Self::Rsa2048 | Self::Rsa4096)
    }
}

impl From<String> for KeyType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "aes256-gcm96" => Self::Aes256Gcm96,
            "rsa-2048" => Self::Rsa2048,
            "rsa-4096" => Self::Rsa4096,
            _ => Self::Other(value),
        }
    }
}

impl From<KeyType> for String {
    fn from(value: KeyType) -> Self {
        match value {
            KeyType::Aes256Gcm96 => "aes256-gcm96".to_string(),
            KeyType::Rsa2048 => "rsa-2048".to_string(),
            KeyType::Rsa4096 => "rsa-4096".to_string(),
            KeyType::Other(other) => other,
        }
    }
}

/// One version entry of a named key.
///
/// Symmetric keys report a creation timestamp per version; asymmetric keys
/// report their public component. Some deployments return the bare PEM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyVersion {
    Public {
        public_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creation_time: Option<String>,
    },
    Created(i64),
    Pem(String),
}

impl KeyVersion {
    /// The public key PEM, if this version exposes one.
    pub fn public_key(&self) -> Option<&str> {
        match self {
            Self::Public { public_key, .. } => Some(public_key),
            Self::Pem(pem) if pem.contains("-----BEGIN") => Some(pem),
            _ => None,
        }
    }
}

/// Metadata for a named key held by the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub key_type: KeyType,
    #[serde(default)]
    pub latest_version: u64,
    /// Version number to version entry. Versions are numeric, not lexical.
    pub keys: BTreeMap<u64, KeyVersion>,
}

impl KeyMetadata {
    /// Highest version number present in `keys`.
    pub fn newest_version(&self) -> Option<u64> {
        self.keys.keys().next_back().copied()
    }

    /// Public key PEM of the highest version that exposes one.
    pub fn latest_public_key(&self) -> Option<(u64, &str)> {
        self.keys
            .iter()
            .rev()
            .find_map(|(version, entry)| entry.public_key().map(|pem| (*version, pem)))
    }
}

/// A data key generated by the service.
pub struct DataKey {
    /// The key wrapped under the named service key. Always present.
    pub ciphertext: String,
    /// Raw key bytes, only when requested in plaintext mode.
    pub plaintext: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("ciphertext", &self.ciphertext)
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Point-in-time snapshot of key-management availability.
///
/// Derived on every check and never cached beyond it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// True only when the service answered and no required key is missing.
    pub healthy: bool,
    pub service_reachable: bool,
    pub available_keys: BTreeSet<String>,
    pub missing_keys: BTreeSet<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub(crate) fn evaluate(
        service_reachable: bool,
        available_keys: BTreeSet<String>,
        required: &BTreeSet<String>,
    ) -> Self {
        let missing_keys: BTreeSet<String> =
            required.difference(&available_keys).cloned().collect();
        Self {
            healthy: service_reachable && missing_keys.is_empty(),
            service_reachable,
            available_keys,
            missing_keys,
            checked_at: Utc::now(),
        }
    }

    /// Human-readable summary for status displays.
    pub fn summary(&self) -> String {
        if self.healthy {
            "key-management service is properly configured".to_string()
        } else if !self.service_reachable {
            "key-management service is unreachable".to_string()
        } else {
            let missing: Vec<&str> = self.missing_keys.iter().map(String::as_str).collect();
            format!("key-management service missing keys: {}", missing.join(", "))
        }
    }
}

/// Outcome of a single connectivity probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub message: String,
}

/// Combined report of every dependency the encryption core relies on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub backend: ProbeResult,
    pub key_management: ProbeResult,
    pub health: HealthStatus,
    pub all_passed: bool,
}
