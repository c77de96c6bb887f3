//! `reqwest`-backed [`Network`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use http::header;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::{NetError, Network, Request, Response};

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("busiloo-sw/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            timeout_secs: 30,
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Fetches requests over HTTP.
pub struct HttpNetwork {
    client: Client,
    config: LoaderConfig,
}

impl HttpNetwork {
    /// Create a new HTTP network.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpNetwork initialized");

        Ok(Self { client, config })
    }

    fn classify(&self, request: &Request, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::Timeout(request.timeout.unwrap_or_else(|| self.config.timeout()))
        } else if err.is_connect() {
            NetError::Unreachable(err.to_string())
        } else {
            NetError::HttpError(err)
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if !request.headers.contains_key(header::ACCEPT_LANGUAGE) {
            req_builder = req_builder.header(header::ACCEPT_LANGUAGE, &self.config.accept_language);
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| self.classify(request, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(request, e))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body))
    }
}
