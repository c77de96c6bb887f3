//! Fetch dispatch: routes each intercepted request to a strategy and runs it.

use std::sync::Arc;

use busiloo_net::{Network, Request, Response, ResponseSource};
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheStorage};
use crate::config::WorkerConfig;
use crate::router::{Router, Strategy};
use crate::SwError;

/// Body served for route searches when neither network nor cache can answer.
pub const ROUTE_RESULTS_FALLBACK: &str = r#"{"type":"none","results":[]}"#;

/// Body served for every other API request when neither network nor cache can answer.
pub const EMPTY_LIST_FALLBACK: &str = "[]";

/// Answers intercepted requests.
pub struct Dispatcher {
    config: Arc<WorkerConfig>,
    router: Router,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        let router = config.router();
        Self {
            config,
            router,
            caches,
            network,
        }
    }

    /// The strategy `request` will be answered with.
    pub fn strategy_for(&self, request: &Request) -> Strategy {
        self.router.route_request(request)
    }

    /// Produce a response for `request`.
    ///
    /// Network-first and dynamic-HTML requests only fail on cache storage errors or,
    /// for navigations, when the shell root was never cached. Cache-first requests
    /// fail when both the partitions and the network miss.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Response, SwError> {
        let strategy = self.strategy_for(request);
        debug!(url = %request.url, method = %request.method, %strategy, "Dispatching fetch");

        match strategy {
            Strategy::DynamicHtml => self.dynamic_html(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Response, SwError> {
        let cache = self.caches.open(&self.config.partitions.data).await?;

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(cache.as_ref(), request, &response).await;
                Ok(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed; returning cache or fallback");

                if let Some(cached) = self.lookup(cache.as_ref(), request).await {
                    return Ok(cached);
                }

                let body = self.fallback_body(request);
                info!(url = %request.url, body, "Serving fallback JSON");
                Ok(Response::json_body(request.url.clone(), body)
                    .with_source(ResponseSource::Fallback))
            }
        }
    }

    async fn dynamic_html(&self, request: &Request) -> Result<Response, SwError> {
        let cache = self.caches.open(&self.config.partitions.html).await?;

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(cache.as_ref(), request, &response).await;
                Ok(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Navigation failed; returning cached page or shell");

                if let Some(cached) = self.lookup(cache.as_ref(), request).await {
                    return Ok(cached);
                }

                let root = self.config.shell_root_request()?;
                let shell = self.caches.open(&self.config.partitions.shell).await?;
                self.lookup(shell.as_ref(), &root)
                    .await
                    .ok_or_else(|| SwError::NotFound(format!("shell root {}", root.url)))
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response, SwError> {
        if let Some(cached) = self.caches.match_request(request).await? {
            debug!(url = %request.url, "Cache hit");
            return Ok(cached);
        }
        // Static assets fetched here are not written back; only install populates them.
        Ok(self.network.fetch(request).await?)
    }

    /// Store a live response. A failed write is logged and otherwise ignored.
    async fn store(&self, cache: &dyn Cache, request: &Request, response: &Response) {
        if let Err(e) = cache.put(request, response).await {
            warn!(cache = cache.name(), url = %request.url, error = %e, "Could not cache response");
        }
    }

    /// Look up a partition on the fallback path. Read errors count as a miss.
    async fn lookup(&self, cache: &dyn Cache, request: &Request) -> Option<Response> {
        match cache.match_request(request).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(cache = cache.name(), url = %request.url, error = %e, "Cache read failed");
                None
            }
        }
    }

    fn fallback_body(&self, request: &Request) -> &'static str {
        if self.router.is_route_results(request.url.as_str()) {
            ROUTE_RESULTS_FALLBACK
        } else {
            EMPTY_LIST_FALLBACK
        }
    }
}
