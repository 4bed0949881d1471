//! Wires the client, monitor and orchestrator together from one config.

use crate::backend::BackendClient;
use crate::client::TransitClient;
use crate::config::TransitConfig;
use crate::error::TransitResult;
use crate::health::HealthMonitor;
use crate::orchestrator::Orchestrator;
use crate::payload::Record;
use crate::sequence::Sequencer;
use crate::types::{HealthStatus, SystemStatus};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Owns the single shared [`TransitClient`] and everything built on it.
#[derive(Debug)]
pub struct EncryptionContext {
    config: TransitConfig,
    client: Arc<TransitClient>,
    backend: Arc<BackendClient>,
    monitor: Arc<HealthMonitor>,
    orchestrator: Orchestrator,
    sequencer: Sequencer,
}

impl EncryptionContext {
    pub fn new(config: TransitConfig) -> TransitResult<Self> {
        let client = Arc::new(TransitClient::new(&config)?);
        let backend = Arc::new(BackendClient::new(&config)?);
        let monitor = Arc::new(
            HealthMonitor::new(Arc::clone(&client), &config.keys, config.encryption_enabled)
                .with_backend(Arc::clone(&backend)),
        );
        let orchestrator = Orchestrator::new(Arc::clone(&client), Arc::clone(&monitor), &config)?;

        info!(
            "encryption context ready: service={} mode={:?} enabled={}",
            client.base_url(),
            config.mode,
            config.encryption_enabled
        );

        Ok(Self {
            config,
            client,
            backend,
            monitor,
            orchestrator,
            sequencer: Sequencer::default(),
        })
    }

    pub fn from_env() -> TransitResult<Self> {
        Self::new(TransitConfig::from_env()?)
    }

    pub fn config(&self) -> &TransitConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<TransitClient> {
        &self.client
    }

    pub fn backend(&self) -> &Arc<BackendClient> {
        &self.backend
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Ticket source behind [`Self::load_record`].
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Starts the background health watcher at the configured cadence.
    pub fn start_health_watch(&self) -> (JoinHandle<()>, watch::Receiver<Option<HealthStatus>>) {
        self.monitor.watch(self.config.health_poll_interval())
    }

    pub async fn system_status(&self) -> SystemStatus {
        self.monitor.system_status().await
    }

    pub async fn submit_record(&self, path: &str, record: &Record) -> TransitResult<Value> {
        self.orchestrator.submit_record(&self.backend, path, record).await
    }

    /// Loads and opens a record. Only the newest load may deliver: one that
    /// finishes after a later load began fails with `Superseded`.
    pub async fn load_record(&self, path: &str) -> TransitResult<Record> {
        let ticket = self.sequencer.begin();
        let record = self.orchestrator.load_record(&self.backend, path).await?;
        self.sequencer.accept(ticket, record)
    }
}
