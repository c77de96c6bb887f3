//! # Busiloo Service Worker
//!
//! The offline layer of the Busiloo bus-route app: a service worker that keeps the
//! application shell and API responses in named cache partitions and answers
//! intercepted requests from the network, the cache or a synthesized fallback.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache the shell), activate (prune old partitions, claim pages)
//! - **Fetch dispatch**: network-first for API calls, dynamic HTML for navigations,
//!   cache-first for static assets
//! - **Cache API**: `open`, `put`, `match`, `keys`, `delete` behind [`CacheStorage`]
//! - **Clients API**: pages controlled by the active worker
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker
//!     ├── LifecycleManager ── install / activate
//!     ├── Dispatcher ──────── Router → Strategy
//!     │                           ├── NetworkFirst  (data partition, JSON fallback)
//!     │                           ├── DynamicHtml   (html partition, shell root)
//!     │                           └── CacheFirst    (any partition, then network)
//!     ├── Arc<dyn CacheStorage>
//!     ├── Arc<dyn Network>
//!     └── Clients
//! ```

use std::sync::Arc;

use busiloo_net::{NetError, Network, Request, Response};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

pub mod cache;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    Cache, CacheEntry, CacheStorage, MemoryCache, MemoryCacheStorage, PartitionSnapshot,
    StorageSnapshot, StoredHeader,
};
pub use clients::{Client, Clients};
pub use config::{PartitionNames, WorkerConfig};
pub use dispatch::{Dispatcher, EMPTY_LIST_FALLBACK, ROUTE_RESULTS_FALLBACK};
pub use lifecycle::{
    ActivationReport, LifecycleManager, ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerState,
};
pub use router::{Router, Strategy};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ==================== Fetch Event ====================

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Page that issued the request, if known. Unknown pages are registered
    /// as clients so activation can claim them.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

// ==================== Service Worker ====================

/// One worker version bound to its cache storage and network.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    lifecycle: LifecycleManager,
    dispatcher: Dispatcher,
    network: Arc<dyn Network>,
    clients: Arc<Clients>,
}

impl ServiceWorker {
    /// Create a worker. The receiver yields lifecycle events.
    pub fn new(
        config: WorkerConfig,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let config = Arc::new(config);
        let clients = Arc::new(Clients::new());
        let (lifecycle, events) = LifecycleManager::new(
            config.clone(),
            caches.clone(),
            network.clone(),
            clients.clone(),
        );
        let dispatcher = Dispatcher::new(config.clone(), caches, network.clone());

        (
            Self {
                config,
                lifecycle,
                dispatcher,
                network,
                clients,
            },
            events,
        )
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.lifecycle.id()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.state().await
    }

    pub fn clients(&self) -> &Arc<Clients> {
        &self.clients
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle the install event. Returns the number of precached assets.
    pub async fn install(&self) -> Result<usize, SwError> {
        self.lifecycle.install().await
    }

    /// Handle the activate event.
    pub async fn activate(&self) -> Result<ActivationReport, SwError> {
        self.lifecycle.activate().await
    }

    /// Handle a fetch event. Until activation, requests go straight to the network.
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<Response, SwError> {
        let active = self.state().await == ServiceWorkerState::Activated;
        if let Some(client_id) = &event.client_id {
            self.track_client(client_id, &event.request, active).await;
        }

        if !active {
            trace!(url = %event.request.url, "Worker not active; passing through");
            return Ok(self.network.fetch(&event.request).await?);
        }
        self.dispatcher.handle_fetch(&event.request).await
    }

    /// Record the page behind a fetch. A navigation moves the page to the
    /// request URL; a subresource from an unseen page registers it at the origin.
    /// Pages seen while active are controlled by this worker.
    async fn track_client(&self, client_id: &str, request: &Request, active: bool) {
        let mut client = match self.clients.get(client_id).await {
            Some(_) if !request.is_navigation() => return,
            Some(mut client) => {
                client.url = request.url.clone();
                client
            }
            None if request.is_navigation() => Client::new(client_id, request.url.clone()),
            None => Client::new(client_id, self.config.origin.clone()),
        };
        if active {
            client.controller = Some(self.id());
        }
        trace!(client = client_id, url = %client.url, "Tracking client");
        self.clients.add(client).await;
    }
}
