//! Record payload types carried between the orchestrator and the backend.

use crate::client::CIPHERTEXT_PREFIX;
use crate::config::CipherMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A structured record as handed over by a form or returned by the backend.
pub type Record = serde_json::Map<String, Value>;

/// One record field, tagged with its encryption state at write time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SealedField {
    /// Copied verbatim; never a field the caller marked sensitive with a
    /// non-empty value.
    Plaintext(Value),
    /// Opaque ciphertext; format depends on the payload's [`CipherMode`].
    Ciphertext(String),
}

impl SealedField {
    pub fn is_ciphertext(&self) -> bool {
        matches!(self, Self::Ciphertext(_))
    }

    pub fn as_plaintext(&self) -> Option<&Value> {
        match self {
            Self::Plaintext(value) => Some(value),
            Self::Ciphertext(_) => None,
        }
    }

    /// Classifies an untagged value from a record written before fields were
    /// tagged, by looking for the service ciphertext prefix.
    ///
    /// Plaintext that happens to start with the prefix is misclassified and
    /// will fail decryption. Only
    /// [`resolve_legacy_record`](crate::orchestrator::Orchestrator::resolve_legacy_record)
    /// uses this.
    pub fn classify_legacy(raw: String) -> Self {
        if raw.starts_with(CIPHERTEXT_PREFIX) {
            Self::Ciphertext(raw)
        } else {
            Self::Plaintext(Value::String(raw))
        }
    }
}

/// Field names that must be encrypted for a record type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveFieldSet(BTreeSet<String>);

impl SensitiveFieldSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Fields of a clinical patient record that never leave in plaintext.
    pub fn clinical_record() -> Self {
        Self::new(["diagnosis", "notes", "medications"])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An outbound record with its sensitive fields encrypted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Every field of the record; sensitive ones as ciphertext.
    pub fields: BTreeMap<String, SealedField>,
    /// Session key wrapped for the recipient.
    pub wrapped_session_key: String,
    /// Session key wrapped for the sender, so the sender can read it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_wrapped_session_key: Option<String>,
    /// PEM public key the recipient wraps replies for.
    pub sender_public_key_ref: String,
    pub mode: CipherMode,
}

impl EncryptedPayload {
    /// Names of the fields carried as ciphertext.
    pub fn encrypted_field_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.is_ciphertext())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sealed_field_wire_shape() {
        let field = SealedField::Ciphertext("vault:v1:abc".into());
        assert_eq!(
            serde_json::to_value(&field).unwrap(),
            json!({"kind": "ciphertext", "value": "vault:v1:abc"})
        );
        let plain: SealedField =
            serde_json::from_value(json!({"kind": "plaintext", "value": 42})).unwrap();
        assert_eq!(plain.as_plaintext(), Some(&json!(42)));
    }

    #[test]
    fn legacy_classification_uses_prefix() {
        assert!(SealedField::classify_legacy("vault:v2:zzz".into()).is_ciphertext());
        assert!(!SealedField::classify_legacy("2024-01-01".into()).is_ciphertext());
    }

    #[test]
    fn clinical_preset() {
        let set = SensitiveFieldSet::clinical_record();
        assert!(set.contains("diagnosis"));
        assert!(set.contains("medications"));
        assert!(!set.contains("visitDate"));
        assert_eq!(set.len(), 3);
    }
}
