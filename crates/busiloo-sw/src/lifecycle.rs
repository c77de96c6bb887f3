//! Install and activate: shell precache, stale partition pruning, client claim.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use busiloo_net::{Network, Request, Response};
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::SwError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching the shell.
    Installing,
    /// Shell cached; activation may proceed.
    Installed,
    /// Pruning stale partitions.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed.
    Redundant,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A page came under this worker's control.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

/// Outcome of a successful activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Partitions deleted because they belong to an older version.
    pub deleted: Vec<String>,
    /// Clients that came under control.
    pub claimed: Vec<String>,
}

/// Drives install and activate for one worker version.
pub struct LifecycleManager {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Arc<Clients>,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Arc<Clients>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ServiceWorkerId::new(),
                config,
                caches,
                network,
                clients,
                state: RwLock::new(ServiceWorkerState::Parsed),
                skip_waiting: AtomicBool::new(false),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Whether install asked to take over without waiting for older workers.
    pub fn skips_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    async fn set_state(&self, new_state: ServiceWorkerState) {
        *self.state.write().await = new_state;
        debug!(worker = %self.id, state = ?new_state, "Worker state changed");
        // No receiver just means nobody is listening.
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            new_state,
        });
    }

    /// Precache every shell asset. All-or-nothing: one failed asset fails the
    /// install, stores nothing and makes the worker redundant.
    pub async fn install(&self) -> Result<usize, SwError> {
        let current = self.state().await;
        if current != ServiceWorkerState::Parsed {
            return Err(SwError::StateError(format!(
                "cannot install from {current:?}"
            )));
        }
        self.set_state(ServiceWorkerState::Installing).await;

        match self.precache_shell().await {
            Ok(count) => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.set_state(ServiceWorkerState::Installed).await;
                info!(worker = %self.id, assets = count, cache = %self.config.partitions.shell, "Install complete");
                Ok(count)
            }
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn precache_shell(&self) -> Result<usize, SwError> {
        let cache = self.caches.open(&self.config.partitions.shell).await?;
        let requests = self.config.shell_requests()?;

        let responses = try_join_all(requests.iter().map(|r| self.fetch_asset(r))).await?;

        for (request, response) in requests.iter().zip(responses.iter()) {
            cache.put(request, response).await?;
        }
        Ok(requests.len())
    }

    async fn fetch_asset(&self, request: &Request) -> Result<Response, SwError> {
        let response = self
            .network
            .fetch(request)
            .await
            .map_err(|e| SwError::InstallFailed(format!("{}: {e}", request.url)))?;

        if !response.ok() {
            return Err(SwError::InstallFailed(format!(
                "{}: status {}",
                request.url, response.status
            )));
        }
        debug!(url = %request.url, bytes = response.body.len(), "Fetched shell asset");
        Ok(response)
    }

    /// Delete partitions outside the allow-list, then claim open pages.
    pub async fn activate(&self) -> Result<ActivationReport, SwError> {
        let current = self.state().await;
        if current != ServiceWorkerState::Installed {
            return Err(SwError::StateError(format!(
                "cannot activate from {current:?}"
            )));
        }
        self.set_state(ServiceWorkerState::Activating).await;

        let deleted = match self.prune_stale_partitions().await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Activation failed");
                self.set_state(ServiceWorkerState::Installed).await;
                return Err(e);
            }
        };

        let claimed = self.claim_clients().await;
        self.set_state(ServiceWorkerState::Activated).await;

        info!(
            worker = %self.id,
            deleted = deleted.len(),
            claimed = claimed.len(),
            "Activation complete"
        );
        Ok(ActivationReport { deleted, claimed })
    }

    async fn prune_stale_partitions(&self) -> Result<Vec<String>, SwError> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| !self.config.partitions.is_current(name))
            .collect();

        let results = join_all(stale.iter().map(|name| self.caches.delete(name))).await;
        let mut deleted = Vec::with_capacity(stale.len());
        for (name, result) in stale.into_iter().zip(results) {
            if result? {
                debug!(cache = %name, "Deleted stale partition");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    async fn claim_clients(&self) -> Vec<String> {
        let claimed = self.clients.claim(self.id, &self.config.origin).await;
        for client_id in &claimed {
            let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.id,
            });
        }
        claimed
    }
}
