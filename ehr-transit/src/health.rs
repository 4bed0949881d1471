//! Availability checks for the key-management service.
//!
//! Every check talks to the service; nothing is cached between calls except
//! the last published snapshot, which is informational only. Encryption
//! decisions always use a fresh check.

use crate::backend::BackendClient;
use crate::client::TransitClient;
use crate::config::KeyNames;
use crate::error::{TransitError, TransitResult};
use crate::sequence::Sequencer;
use crate::types::{HealthStatus, ProbeResult, SystemStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct HealthMonitor {
    client: Arc<TransitClient>,
    backend: Option<Arc<BackendClient>>,
    required: BTreeSet<String>,
    encryption_enabled: bool,
    sequencer: Sequencer,
    latest: watch::Sender<Option<HealthStatus>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("required", &self.required)
            .field("encryption_enabled", &self.encryption_enabled)
            .field("backend", &self.backend.as_ref().map(|b| b.base_url().to_string()))
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(client: Arc<TransitClient>, keys: &KeyNames, encryption_enabled: bool) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            client,
            backend: None,
            required: keys.required(),
            encryption_enabled,
            sequencer: Sequencer::default(),
            latest,
        }
    }

    /// Adds the backend reachability probe used by [`Self::system_status`].
    pub fn with_backend(mut self, backend: Arc<BackendClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn client(&self) -> &Arc<TransitClient> {
        &self.client
    }

    pub fn required_keys(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Queries the service for its keys and compares them to the required set.
    ///
    /// An unreachable service yields `healthy == false` with every required
    /// key reported missing.
    pub async fn check_health(&self) -> HealthStatus {
        let status = match self.client.try_list_keys().await {
            Ok(keys) => HealthStatus::evaluate(true, keys, &self.required),
            Err(e) => {
                warn!("key-management health check failed: {e}");
                HealthStatus::evaluate(false, BTreeSet::new(), &self.required)
            }
        };
        debug!("health: {}", status.summary());
        status
    }

    /// True when the kill switch is on and a fresh check is healthy.
    ///
    /// With the kill switch off this returns false without any network call.
    pub async fn is_encryption_enabled(&self) -> bool {
        self.encryption_enabled && self.check_health().await.healthy
    }

    /// Like [`Self::is_encryption_enabled`] but explains a refusal.
    pub async fn ensure_available(&self) -> TransitResult<HealthStatus> {
        if !self.encryption_enabled {
            return Err(TransitError::EncryptionUnavailable(
                "encryption is disabled by configuration".to_string(),
            ));
        }
        let status = self.check_health().await;
        if status.healthy {
            Ok(status)
        } else {
            Err(TransitError::EncryptionUnavailable(status.summary()))
        }
    }

    /// Runs a check and publishes it unless a later check started meanwhile.
    pub async fn refresh(&self) -> HealthStatus {
        let ticket = self.sequencer.begin();
        let status = self.check_health().await;
        if self.sequencer.is_current(ticket) {
            self.latest.send_replace(Some(status.clone()));
        } else {
            debug!("dropping health result for superseded ticket {}", ticket.value());
        }
        status
    }

    /// Most recently published snapshot, if any check has completed.
    pub fn last_status(&self) -> Option<HealthStatus> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<HealthStatus>> {
        self.latest.subscribe()
    }

    /// Re-checks health every `interval` until all subscribers are gone.
    ///
    /// The first check runs immediately.
    pub fn watch(
        self: &Arc<Self>,
        interval: Duration,
    ) -> (JoinHandle<()>, watch::Receiver<Option<HealthStatus>>) {
        let rx = self.subscribe();
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut was_healthy = None;
            loop {
                ticker.tick().await;
                if monitor.latest.is_closed() {
                    debug!("health watcher stopping, no subscribers");
                    break;
                }
                let status = monitor.refresh().await;
                if was_healthy != Some(status.healthy) {
                    info!("encryption availability changed: {}", status.summary());
                    was_healthy = Some(status.healthy);
                }
            }
        });
        (handle, rx)
    }

    /// Probes the backend and the key-management service concurrently.
    pub async fn system_status(&self) -> SystemStatus {
        let backend_probe = async {
            match &self.backend {
                Some(backend) => backend.probe().await,
                None => ProbeResult {
                    success: false,
                    message: "backend probe not configured".to_string(),
                },
            }
        };
        let (backend, health) = tokio::join!(backend_probe, self.check_health());

        let key_management = ProbeResult {
            success: health.healthy,
            message: health.summary(),
        };
        let all_passed = backend.success && key_management.success;
        SystemStatus {
            backend,
            key_management,
            health,
            all_passed,
        }
    }
}
