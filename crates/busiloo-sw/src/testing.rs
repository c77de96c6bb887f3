//! In-memory network for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use busiloo_net::{NetError, Network, Request, Response};
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderValue, StatusCode};

/// Serves canned responses by URL path. Unknown paths get a 404.
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, (u16, String)>>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Fetch attempts so far, online or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(request.url.to_string()));
        }

        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.path())
            .cloned()
            .unwrap_or_else(|| (404, String::new()));

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Ok(Response::new(
            request.url.clone(),
            StatusCode::from_u16(status).unwrap(),
            headers,
            Bytes::from(body),
        ))
    }
}
