use ehr_transit::config::{
    ENV_ENCRYPTION_ENABLED, ENV_ENCRYPTION_MODE, ENV_VAULT_TOKEN, ENV_VAULT_URL,
};
use ehr_transit::{CipherMode, KeyNames, TransitConfig, TransitError};
use std::collections::HashMap;
use std::time::Duration;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

fn minimal() -> Vec<(&'static str, &'static str)> {
    vec![(ENV_VAULT_URL, "http://localhost:18200"), (ENV_VAULT_TOKEN, "s.abc")]
}

#[test]
fn default_api_base_url() {
    assert_eq!(TransitConfig::default().api_base_url, "http://localhost:3001/api");
}

#[test]
fn default_timeouts() {
    let config = TransitConfig::default();
    assert_eq!(config.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.health_poll_interval(), Duration::from_secs(30));
}

#[test]
fn default_key_names() {
    let keys = KeyNames::default();
    assert_eq!(keys.frontend_aes, "ehr-aes-master-frontend");
    assert_eq!(keys.backend_aes, "ehr-aes-master-backend");
    assert_eq!(keys.frontend_rsa, "ehr-rsa-exchange-frontend");
    assert_eq!(keys.backend_rsa, "ehr-rsa-exchange-backend");
    assert_eq!(keys.required().len(), 4);
}

#[test]
fn missing_url_fails_fast() {
    let err = TransitConfig::from_lookup(lookup(&[(ENV_VAULT_TOKEN, "s.abc")])).unwrap_err();
    assert!(matches!(err, TransitError::Config(msg) if msg.contains(ENV_VAULT_URL)));
}

#[test]
fn missing_token_fails_fast() {
    let err = TransitConfig::from_lookup(lookup(&[(ENV_VAULT_URL, "http://localhost:18200")]))
        .unwrap_err();
    assert!(matches!(err, TransitError::Config(msg) if msg.contains(ENV_VAULT_TOKEN)));
}

#[test]
fn blank_token_counts_as_missing() {
    let err = TransitConfig::from_lookup(lookup(&[
        (ENV_VAULT_URL, "http://localhost:18200"),
        (ENV_VAULT_TOKEN, "   "),
    ]))
    .unwrap_err();
    assert!(matches!(err, TransitError::Config(_)));
}

#[test]
fn encryption_is_off_unless_enabled() {
    let config = TransitConfig::from_lookup(lookup(&minimal())).unwrap();
    assert!(!config.encryption_enabled);
    assert_eq!(config.mode, CipherMode::Remote);
}

#[test]
fn encryption_switch_accepts_true_and_one() {
    for value in ["true", "1"] {
        let mut vars = minimal();
        vars.push((ENV_ENCRYPTION_ENABLED, value));
        assert!(TransitConfig::from_lookup(lookup(&vars)).unwrap().encryption_enabled);
    }
    let mut vars = minimal();
    vars.push((ENV_ENCRYPTION_ENABLED, "yes please"));
    assert!(!TransitConfig::from_lookup(lookup(&vars)).unwrap().encryption_enabled);
}

#[test]
fn local_mode_from_env() {
    let mut vars = minimal();
    vars.push((ENV_ENCRYPTION_MODE, "Local"));
    assert_eq!(TransitConfig::from_lookup(lookup(&vars)).unwrap().mode, CipherMode::Local);
}

#[test]
fn unknown_mode_is_rejected() {
    let mut vars = minimal();
    vars.push((ENV_ENCRYPTION_MODE, "hybrid"));
    assert!(matches!(
        TransitConfig::from_lookup(lookup(&vars)),
        Err(TransitError::Config(_))
    ));
}

#[test]
fn non_numeric_timeout_is_rejected() {
    let mut vars = minimal();
    vars.push(("OPENBAO_TIMEOUT_SECS", "ten"));
    assert!(TransitConfig::from_lookup(lookup(&vars)).is_err());
}

#[test]
fn non_http_url_is_rejected() {
    let err = TransitConfig::from_lookup(lookup(&[
        (ENV_VAULT_URL, "ftp://vault"),
        (ENV_VAULT_TOKEN, "s.abc"),
    ]))
    .unwrap_err();
    assert!(matches!(err, TransitError::Config(msg) if msg.contains("http")));
}

#[test]
fn zero_timeout_fails_validation() {
    let config = TransitConfig {
        vault_url: "http://localhost:18200".into(),
        token: "t".into(),
        request_timeout_secs: 0,
        ..TransitConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn token_is_never_serialized_or_printed() {
    let config = TransitConfig::from_lookup(lookup(&minimal())).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("s.abc"));
    assert!(!format!("{config:?}").contains("s.abc"));
}

#[test]
fn serialization_roundtrip_keeps_settings() {
    let mut vars = minimal();
    vars.push((ENV_ENCRYPTION_MODE, "local"));
    let config = TransitConfig::from_lookup(lookup(&vars)).unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let back: TransitConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.vault_url, config.vault_url);
    assert_eq!(back.mode, CipherMode::Local);
    assert_eq!(back.keys, config.keys);
    assert!(back.token.is_empty());
}
