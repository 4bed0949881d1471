//! Dual-key record encryption against a transit key-management service.
//!
//! Provides:
//! - A typed client for the transit HTTP API
//! - Health checks gating every encryption decision
//! - Outbound payload sealing and inbound record opening, with fields
//!   encrypted under a session key that the service either issues and wraps
//!   or that is generated and wrapped locally
//! - Header conventions for carrying wrapped session keys to the backend

pub mod backend;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod payload;
pub mod sequence;
pub mod transport;
pub mod types;

pub use client::TransitClient;
pub use config::{CipherMode, KeyNames, TransitConfig};
pub use context::EncryptionContext;
pub use error::{TransitError, TransitResult};
pub use health::HealthMonitor;
pub use orchestrator::Orchestrator;
pub use payload::{EncryptedPayload, Record, SealedField, SensitiveFieldSet};
pub use types::*;
