//! Outbound and inbound record encryption.
//!
//! Every call re-checks availability first. A call either produces a complete
//! result or fails as a whole; no partially encrypted payload or partially
//! decrypted record is ever returned.

use crate::backend::BackendClient;
use crate::client::TransitClient;
use crate::config::{CipherMode, KeyNames, TransitConfig};
use crate::error::{TransitError, TransitResult};
use crate::health::HealthMonitor;
use crate::payload::{EncryptedPayload, Record, SealedField, SensitiveFieldSet};
use crate::transport;
use ehr_crypto::{PublicKey, SessionKeyPair, SymmetricKey, cipher, keywrap};
use futures::future::try_join_all;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of a single encrypt or decrypt call, for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationState {
    CheckingAvailability,
    Encrypting,
    Decrypting,
    Done,
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckingAvailability => "checking availability",
            Self::Encrypting => "encrypting",
            Self::Decrypting => "decrypting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum Planned {
    Keep(Value),
    Seal(String),
}

pub struct Orchestrator {
    client: Arc<TransitClient>,
    monitor: Arc<HealthMonitor>,
    keys: KeyNames,
    mode: CipherMode,
    sensitive: SensitiveFieldSet,
    /// Present in local mode only.
    session: Option<Arc<SessionKeyPair>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("mode", &self.mode)
            .field("keys", &self.keys)
            .field("sensitive", &self.sensitive)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// In local mode this generates the session key pair, which takes a
    /// noticeable moment.
    pub fn new(
        client: Arc<TransitClient>,
        monitor: Arc<HealthMonitor>,
        config: &TransitConfig,
    ) -> TransitResult<Self> {
        let session = match config.mode {
            CipherMode::Local => Some(Arc::new(SessionKeyPair::generate()?)),
            CipherMode::Remote => None,
        };
        Ok(Self::assemble(client, monitor, config, session))
    }

    /// Builds an orchestrator around an existing session key pair.
    pub fn with_session(
        client: Arc<TransitClient>,
        monitor: Arc<HealthMonitor>,
        config: &TransitConfig,
        session: Arc<SessionKeyPair>,
    ) -> Self {
        Self::assemble(client, monitor, config, Some(session))
    }

    fn assemble(
        client: Arc<TransitClient>,
        monitor: Arc<HealthMonitor>,
        config: &TransitConfig,
        session: Option<Arc<SessionKeyPair>>,
    ) -> Self {
        Self {
            client,
            monitor,
            keys: config.keys.clone(),
            mode: config.mode,
            sensitive: SensitiveFieldSet::clinical_record(),
            session,
        }
    }

    /// Replaces the allow-list used by [`Self::submit_record`].
    pub fn with_sensitive_fields(mut self, sensitive: SensitiveFieldSet) -> Self {
        self.sensitive = sensitive;
        self
    }

    pub fn client(&self) -> &Arc<TransitClient> {
        &self.client
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn sensitive_fields(&self) -> &SensitiveFieldSet {
        &self.sensitive
    }

    pub fn is_field_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(name)
    }

    /// PEM of the local session public key (local mode only).
    pub fn session_public_key_pem(&self) -> TransitResult<String> {
        Ok(self.session_pair()?.public_key_pem()?)
    }

    // ── Outbound ──

    /// Encrypts the `sensitive` fields of `record` and wraps the session key
    /// for the backend.
    pub async fn prepare_outbound_payload(
        &self,
        record: &Record,
        sensitive: &SensitiveFieldSet,
    ) -> TransitResult<EncryptedPayload> {
        trace_state("outbound", OperationState::CheckingAvailability);
        self.monitor.ensure_available().await?;

        trace_state("outbound", OperationState::Encrypting);
        let result = match plan(record, sensitive) {
            Ok(planned) => match self.mode {
                CipherMode::Remote => self.seal_remote(planned).await,
                CipherMode::Local => self.seal_local(planned).await,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(payload) => {
                trace_state("outbound", OperationState::Done);
                info!(
                    "sealed {} of {} field(s) ({:?} mode)",
                    payload.encrypted_field_names().count(),
                    payload.fields.len(),
                    self.mode
                );
                Ok(payload)
            }
            Err(e) => {
                trace_state("outbound", OperationState::Failed);
                warn!("outbound encryption failed: {e}");
                Err(TransitError::encryption(e))
            }
        }
    }

    /// The service issues the data key and wraps it under both exchange keys;
    /// the fields themselves are sealed locally under that data key.
    async fn seal_remote(
        &self,
        planned: Vec<(String, Planned)>,
    ) -> TransitResult<EncryptedPayload> {
        let keys = &self.keys;
        let data_key = self.client.generate_data_key(&keys.frontend_aes, true).await?;
        let raw = data_key.plaintext.ok_or_else(|| {
            TransitError::UnexpectedResponse("data key arrived without key material".to_string())
        })?;
        let session_key = SymmetricKey::from_slice(&raw)?;
        let fields = seal_fields(planned, &session_key)?;

        // The recipient key must exist even though the service does the wrap.
        let (_, wrapped, sender_wrapped, sender_ref) = tokio::try_join!(
            self.client.get_public_key(&keys.backend_rsa),
            self.client.wrap_key(&keys.backend_rsa, session_key.as_bytes()),
            self.client.wrap_key(&keys.frontend_rsa, session_key.as_bytes()),
            self.client.get_public_key(&keys.frontend_rsa),
        )?;

        Ok(EncryptedPayload {
            fields,
            wrapped_session_key: wrapped,
            sender_wrapped_session_key: Some(sender_wrapped),
            sender_public_key_ref: sender_ref,
            mode: CipherMode::Remote,
        })
    }

    async fn seal_local(
        &self,
        planned: Vec<(String, Planned)>,
    ) -> TransitResult<EncryptedPayload> {
        let session = self.session_pair()?;
        let session_key = SymmetricKey::generate();
        let fields = seal_fields(planned, &session_key)?;

        let recipient_pem = self.client.get_public_key(&self.keys.backend_rsa).await?;
        let recipient = PublicKey::from_pem(&recipient_pem)?;
        let wrapped = keywrap::wrap(session_key.as_bytes(), &recipient)?;
        let sender_wrapped = keywrap::wrap(session_key.as_bytes(), session.public_key())?;

        Ok(EncryptedPayload {
            fields,
            wrapped_session_key: wrapped,
            sender_wrapped_session_key: Some(sender_wrapped),
            sender_public_key_ref: session.public_key_pem()?,
            mode: CipherMode::Local,
        })
    }

    // ── Inbound ──

    /// Unwraps the session key and decrypts every ciphertext field.
    pub async fn resolve_inbound_payload(
        &self,
        fields: &BTreeMap<String, SealedField>,
        wrapped_session_key: &str,
    ) -> TransitResult<Record> {
        self.resolve(self.mode, fields, wrapped_session_key).await
    }

    /// Opens a record stored before fields were tagged.
    ///
    /// Values starting with the service ciphertext prefix were encrypted by
    /// the service under the backend's AES key and are opened there. The
    /// session key must still unwrap under this side's exchange key, which
    /// rejects records addressed to someone else.
    pub async fn resolve_legacy_record(
        &self,
        record: BTreeMap<String, String>,
        wrapped_session_key: &str,
    ) -> TransitResult<Record> {
        debug!("resolving untagged record with {} field(s)", record.len());
        let fields: BTreeMap<String, SealedField> = record
            .into_iter()
            .map(|(name, raw)| (name, SealedField::classify_legacy(raw)))
            .collect();

        trace_state("legacy", OperationState::CheckingAvailability);
        self.monitor.ensure_available().await?;

        trace_state("legacy", OperationState::Decrypting);
        let result = self.open_legacy(&fields, wrapped_session_key).await;
        finish("legacy", result)
    }

    async fn resolve(
        &self,
        mode: CipherMode,
        fields: &BTreeMap<String, SealedField>,
        wrapped_session_key: &str,
    ) -> TransitResult<Record> {
        trace_state("inbound", OperationState::CheckingAvailability);
        self.monitor.ensure_available().await?;

        trace_state("inbound", OperationState::Decrypting);
        let session_key = match mode {
            CipherMode::Remote => self.unwrap_remote(wrapped_session_key).await,
            CipherMode::Local => self.unwrap_local(wrapped_session_key),
        };
        let result = session_key.and_then(|key| open_fields(fields, &key));
        finish("inbound", result)
    }

    async fn unwrap_remote(&self, wrapped_session_key: &str) -> TransitResult<SymmetricKey> {
        let raw = self
            .client
            .unwrap_key(&self.keys.frontend_rsa, wrapped_session_key)
            .await
            .map_err(unwrap_failure)?;
        SymmetricKey::from_slice(&raw).map_err(|e| TransitError::Unwrap(e.to_string()))
    }

    fn unwrap_local(&self, wrapped_session_key: &str) -> TransitResult<SymmetricKey> {
        let raw = self
            .session_pair()?
            .unwrap(wrapped_session_key)
            .map_err(|e| TransitError::Unwrap(e.to_string()))?;
        SymmetricKey::from_slice(&raw).map_err(|e| TransitError::Unwrap(e.to_string()))
    }

    async fn open_legacy(
        &self,
        fields: &BTreeMap<String, SealedField>,
        wrapped_session_key: &str,
    ) -> TransitResult<Record> {
        self.client
            .unwrap_key(&self.keys.frontend_rsa, wrapped_session_key)
            .await
            .map_err(unwrap_failure)?;

        let backend_aes = &self.keys.backend_aes;
        let opened = try_join_all(fields.iter().map(|(name, field)| async move {
            let value = match field {
                SealedField::Plaintext(value) => value.clone(),
                SealedField::Ciphertext(ciphertext) => self
                    .client
                    .decrypt_string(backend_aes, ciphertext)
                    .await
                    .map(Value::String)
                    .map_err(|e| field_failure(name, e))?,
            };
            Ok::<_, TransitError>((name.clone(), value))
        }))
        .await?;
        Ok(opened.into_iter().collect())
    }

    // ── Backend round trips ──

    /// Sends `record` to the backend, encrypting allow-listed fields.
    ///
    /// A record with no allow-listed field is sent as-is without touching
    /// the key-management service.
    pub async fn submit_record(
        &self,
        backend: &BackendClient,
        path: &str,
        record: &Record,
    ) -> TransitResult<Value> {
        if !record.keys().any(|name| self.is_field_sensitive(name)) {
            let resp = backend
                .send(Method::POST, path, &Value::Object(record.clone()), Default::default())
                .await?;
            return Ok(resp.body);
        }

        let payload = self.prepare_outbound_payload(record, &self.sensitive).await?;
        let headers = transport::attach_encryption_headers(&payload)?;
        let body = transport::payload_body(&payload)?;
        let resp = backend.send(Method::POST, path, &body, headers).await?;
        Ok(resp.body)
    }

    /// Fetches a record, decrypting it when the backend marks it encrypted.
    ///
    /// The response's mode header decides how the session key is unwrapped;
    /// without one the configured mode applies.
    pub async fn load_record(&self, backend: &BackendClient, path: &str) -> TransitResult<Record> {
        let resp = backend.get(path).await?;
        match transport::read_encrypted_response(&resp.headers)? {
            Some(keys) => {
                let fields = transport::read_sealed_fields(resp.body)?;
                let mode = keys.mode.unwrap_or(self.mode);
                self.resolve(mode, &fields, &keys.wrapped_session_key).await
            }
            None => match resp.body {
                Value::Object(record) => Ok(record),
                other => Err(TransitError::UnexpectedResponse(format!(
                    "expected a record object from {path}, got {}",
                    json_kind(&other)
                ))),
            },
        }
    }

    fn session_pair(&self) -> TransitResult<&SessionKeyPair> {
        self.session.as_deref().ok_or_else(|| {
            TransitError::Config("local encryption requires a session key pair".to_string())
        })
    }
}

fn plan(record: &Record, sensitive: &SensitiveFieldSet) -> TransitResult<Vec<(String, Planned)>> {
    record
        .iter()
        .map(|(name, value)| {
            let planned = if !sensitive.contains(name) {
                Planned::Keep(value.clone())
            } else {
                match value {
                    Value::String(text) if !text.is_empty() => Planned::Seal(text.clone()),
                    Value::String(_) | Value::Null => Planned::Keep(value.clone()),
                    other => {
                        return Err(TransitError::InvalidRecord(format!(
                            "sensitive field {name} must be text, got {}",
                            json_kind(other)
                        )));
                    }
                }
            };
            Ok((name.clone(), planned))
        })
        .collect()
}

fn seal_fields(
    planned: Vec<(String, Planned)>,
    session_key: &SymmetricKey,
) -> TransitResult<BTreeMap<String, SealedField>> {
    planned
        .into_iter()
        .map(|(name, planned)| {
            let field = match planned {
                Planned::Keep(value) => SealedField::Plaintext(value),
                Planned::Seal(text) => {
                    SealedField::Ciphertext(cipher::encrypt(&text, session_key)?)
                }
            };
            Ok((name, field))
        })
        .collect()
}

fn open_fields(
    fields: &BTreeMap<String, SealedField>,
    session_key: &SymmetricKey,
) -> TransitResult<Record> {
    fields
        .iter()
        .map(|(name, field)| {
            let value = match field {
                SealedField::Plaintext(value) => value.clone(),
                SealedField::Ciphertext(ciphertext) => cipher::decrypt(ciphertext, session_key)
                    .map(Value::String)
                    .map_err(|e| field_failure(name, e.into()))?,
            };
            Ok((name.clone(), value))
        })
        .collect()
}

fn finish(direction: &str, result: TransitResult<Record>) -> TransitResult<Record> {
    match &result {
        Ok(record) => {
            trace_state(direction, OperationState::Done);
            debug!("opened record with {} field(s)", record.len());
        }
        Err(e) => {
            trace_state(direction, OperationState::Failed);
            warn!("{direction} decryption failed: {e}");
        }
    }
    result
}

fn unwrap_failure(err: TransitError) -> TransitError {
    match err {
        transient @ (TransitError::Network(_) | TransitError::KeyNotFound(_)) => transient,
        other => TransitError::Unwrap(other.to_string()),
    }
}

fn field_failure(field: &str, err: TransitError) -> TransitError {
    TransitError::Decryption {
        field: field.to_string(),
        reason: err.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn trace_state(direction: &str, state: OperationState) {
    debug!("{direction}: {state}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn plan_seals_only_non_empty_sensitive_text() {
        let rec = record(json!({
            "patient": "p1",
            "diagnosis": "Flu",
            "notes": "",
            "medications": null
        }));
        let planned = plan(&rec, &SensitiveFieldSet::clinical_record()).unwrap();
        let sealed: Vec<&str> = planned
            .iter()
            .filter(|(_, p)| matches!(p, Planned::Seal(_)))
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(sealed, vec!["diagnosis"]);
    }

    #[test]
    fn plan_rejects_non_text_sensitive_values() {
        let rec = record(json!({"diagnosis": {"code": "J10"}}));
        let err = plan(&rec, &SensitiveFieldSet::clinical_record()).err().unwrap();
        assert!(matches!(err, TransitError::InvalidRecord(msg) if msg.contains("object")));
    }

    #[test]
    fn unwrap_failure_keeps_network_errors() {
        assert!(matches!(
            unwrap_failure(TransitError::Network("down".into())),
            TransitError::Network(_)
        ));
        assert!(matches!(
            unwrap_failure(TransitError::Service { status: 400, message: "bad".into() }),
            TransitError::Unwrap(_)
        ));
    }
}
