//! Open pages and the worker controlling each of them.

use hashbrown::HashMap;
use tokio::sync::RwLock;
use url::Url;

use crate::lifecycle::ServiceWorkerId;

/// A client (open page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker currently controlling this page, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// An uncontrolled client.
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            controller: None,
        }
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<String, Client>>,
}

impl Clients {
    /// Create new clients registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// All clients, sorted by id.
    pub async fn match_all(&self) -> Vec<Client> {
        let mut all: Vec<Client> = self.clients.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Make `worker` the controller of every client under `scope`.
    ///
    /// Returns the ids of clients whose controller changed, sorted.
    pub async fn claim(&self, worker: ServiceWorkerId, scope: &Url) -> Vec<String> {
        let mut clients = self.clients.write().await;
        let mut changed: Vec<String> = clients
            .values_mut()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}
