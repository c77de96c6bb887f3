//! # Busiloo Net
//!
//! Request and response types plus the network capability used by the Busiloo offline worker.
//!
//! ## Design Goals
//!
//! 1. **Narrow capability**: the worker only ever calls [`Network::fetch`]
//! 2. **Cloneable responses**: bodies are fully buffered so a response can be cached and returned
//! 3. **Transport vs. HTTP errors**: only transport failures are `Err`; 4xx/5xx are plain responses

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;

pub use url::Url;

pub mod http_network;

pub use http_network::{HttpNetwork, LoaderConfig};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by a fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The key a cache partition stores this request under. Fragments never
    /// reach the server, so `/routes#top` and `/routes` share a key.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    #[default]
    Network,
    Cache,
    /// Synthesized by the worker.
    Fallback,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// Create a network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            body,
            source: ResponseSource::Network,
        }
    }

    /// Create a `200 OK` response with a JSON body.
    pub fn json_body(url: Url, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(url, StatusCode::OK, headers, body.into())
    }

    /// Tag where the response came from.
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed `Content-Type`, if any.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as bytes.
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network as seen by the worker.
///
/// `Err` means a transport failure (offline, refused, timed out). Any HTTP status,
/// including 4xx and 5xx, is an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://busiloo.test/api/trip/42").unwrap();
        let request = Request::get(url.clone())
            .header(
                header::ACCEPT,
                HeaderValue::from_static("application/json"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.mode, RequestMode::Cors);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigate_request() {
        let request = Request::navigate(Url::parse("https://busiloo.test/").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_cache_key_keeps_query() {
        let request = Request::parse("https://busiloo.test/find_route_results?x=1").unwrap();
        assert_eq!(request.cache_key(), "https://busiloo.test/find_route_results?x=1");
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let with_fragment = Request::parse("https://busiloo.test/routes?line=4#top").unwrap();
        let without = Request::parse("https://busiloo.test/routes?line=4").unwrap();
        assert_eq!(with_fragment.cache_key(), "https://busiloo.test/routes?line=4");
        assert_eq!(with_fragment.cache_key(), without.cache_key());
        assert_eq!(with_fragment.url.fragment(), Some("top"));
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_json_body_response() {
        let url = Url::parse("https://busiloo.test/api/x").unwrap();
        let response = Response::json_body(url, "[]");

        assert!(response.ok());
        assert_eq!(response.content_type(), Some(mime::APPLICATION_JSON));
        assert_eq!(response.text().unwrap(), "[]");
        let parsed: Vec<u32> = response.json().unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_http_error_status_is_a_response() {
        let url = Url::parse("https://busiloo.test/missing").unwrap();
        let response = Response::new(url, StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new());
        assert!(!response.ok());
        assert_eq!(response.source, ResponseSource::Network);
    }
}
