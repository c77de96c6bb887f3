//! Cache storage: named partitions of request/response pairs.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (partition, e.g. "busiloo-shell-v1")
//!             └── request URL → CacheEntry
//! ```
//!
//! The worker only talks to the [`CacheStorage`] and [`Cache`] traits.
//! [`MemoryCacheStorage`] is the in-process implementation; it can be written to
//! and read back from a JSON snapshot so partitions outlive the process.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use busiloo_net::{Request, Response, ResponseSource};
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::SwError;

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

// ==================== Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the key).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in the order received.
    pub headers: Vec<StoredHeader>,

    /// Response body.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| StoredHeader {
                name: name.as_str().to_string(),
                value: value.as_bytes().to_vec(),
            })
            .collect();

        Self {
            url: request.cache_key(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: busiloo_common::now_millis(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, SwError> {
        let url = Url::parse(&self.url)
            .map_err(|e| SwError::CacheError(format!("bad cached url {:?}: {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| SwError::CacheError(format!("bad cached status {}: {e}", self.status)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| {
                SwError::CacheError(format!("bad cached header {:?}: {e}", header.name))
            })?;
            let value = HeaderValue::from_bytes(&header.value)
                .map_err(|e| SwError::CacheError(format!("bad cached header value: {e}")))?;
            headers.append(name, value);
        }

        Ok(Response::new(url, status, headers, Bytes::from(self.body.clone()))
            .with_source(ResponseSource::Cache))
    }
}

/// A response header. The value keeps its raw bytes, which need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ==================== Traits ====================

/// One named partition.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Partition name.
    fn name(&self) -> &str;

    /// Insert or overwrite the entry for `request`. Only GET requests can be stored.
    async fn put(&self, request: &Request, response: &Response) -> Result<(), SwError>;

    /// Look up `request`. Non-GET requests never match.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError>;

    /// Remove the entry for `request`.
    async fn delete(&self, request: &Request) -> Result<bool, SwError>;

    /// All stored keys, sorted.
    async fn keys(&self) -> Result<Vec<String>, SwError>;
}

/// The set of partitions (the `caches` global).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a partition, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, SwError>;

    /// Check if a partition exists.
    async fn has(&self, name: &str) -> Result<bool, SwError>;

    /// Delete a partition and its entries.
    async fn delete(&self, name: &str) -> Result<bool, SwError>;

    /// Partition names, in creation order.
    async fn keys(&self) -> Result<Vec<String>, SwError>;

    /// Look up `request` in every partition, in creation order.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError>;
}

// ==================== In-memory cache ====================

/// An in-memory partition.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    /// Create a new, empty partition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn with_entries(name: String, entries: Vec<CacheEntry>) -> Self {
        let entries = entries.into_iter().map(|e| (e.url.clone(), e)).collect();
        Self {
            name,
            entries: RwLock::new(entries),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn snapshot(&self) -> PartitionSnapshot {
        let mut entries: Vec<CacheEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        PartitionSnapshot {
            name: self.name.clone(),
            entries,
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, request: &Request, response: &Response) -> Result<(), SwError> {
        if request.method != Method::GET {
            return Err(SwError::CacheError(format!(
                "cannot store {} {}: only GET requests are cacheable",
                request.method, request.url
            )));
        }

        let entry = CacheEntry::from_response(request, response);
        trace!(cache = %self.name, url = %entry.url, status = entry.status, "Cache put");
        self.entries.write().await.insert(entry.url.clone(), entry);
        Ok(())
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        match self.entries.read().await.get(&request.cache_key()) {
            Some(entry) => entry.to_response().map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, request: &Request) -> Result<bool, SwError> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&request.cache_key())
            .is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ==================== In-memory storage ====================

/// Serialized form of a [`MemoryCacheStorage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub version: u32,
    pub partitions: Vec<PartitionSnapshot>,
}

/// Serialized form of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub name: String,
    pub entries: Vec<CacheEntry>,
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    /// Partitions in creation order.
    caches: RwLock<Vec<Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    /// Create new, empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild storage from a snapshot.
    pub fn from_snapshot(snapshot: StorageSnapshot) -> Result<Self, SwError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SwError::CacheError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        let caches = snapshot
            .partitions
            .into_iter()
            .map(|p| Arc::new(MemoryCache::with_entries(p.name, p.entries)))
            .collect();
        Ok(Self {
            caches: RwLock::new(caches),
        })
    }

    /// Capture every partition.
    pub async fn snapshot(&self) -> StorageSnapshot {
        let caches = self.caches.read().await.clone();
        let mut partitions = Vec::with_capacity(caches.len());
        for cache in caches {
            partitions.push(cache.snapshot().await);
        }
        StorageSnapshot {
            version: SNAPSHOT_VERSION,
            partitions,
        }
    }

    /// Load a snapshot file. A missing file yields empty storage.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SwError> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(raw) => {
                let snapshot: StorageSnapshot = serde_json::from_slice(&raw)?;
                debug!(path = %path.display(), partitions = snapshot.partitions.len(), "Loaded cache store");
                Self::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache store yet, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a snapshot file, replacing any previous one.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SwError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(&self.snapshot().await)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), "Saved cache store");
        Ok(())
    }

    async fn find(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, SwError> {
        if let Some(cache) = self.find(name).await {
            return Ok(cache);
        }

        let mut caches = self.caches.write().await;
        // Another task may have created it between the two locks.
        if let Some(cache) = caches.iter().find(|c| c.name == name) {
            return Ok(cache.clone());
        }
        debug!(cache = name, "Creating cache partition");
        let cache = Arc::new(MemoryCache::new(name));
        caches.push(cache.clone());
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.find(name).await.is_some())
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|c| c.name != name);
        Ok(caches.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        Ok(self
            .caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, SwError> {
        let caches = self.caches.read().await.clone();
        for cache in caches {
            if let Some(response) = cache.match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
