//! End-to-end offline behavior of an installed and activated worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use busiloo_net::{NetError, Network, Request, Response, ResponseSource, Url};
use busiloo_sw::{
    Cache, CacheStorage, FetchEvent, MemoryCacheStorage, ServiceWorker, ServiceWorkerState, WorkerConfig,
};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};

const ORIGIN: &str = "https://busiloo.test/";

/// Origin server stand-in that can be switched off.
struct Origin {
    pages: Mutex<Vec<(String, String)>>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl Origin {
    fn new() -> Arc<Self> {
        let origin = Arc::new(Self {
            pages: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        origin.serve("/", "<html>busiloo</html>");
        origin.serve("/static/home.css", "body{margin:0}");
        origin.serve("/static/busiloo.svg", "<svg/>");
        origin.serve("/static/translater.js", "function t(){}");
        origin
    }

    fn serve(&self, path: &str, body: &str) {
        let mut pages = self.pages.lock().unwrap();
        pages.retain(|(p, _)| p != path);
        pages.push((path.to_string(), body.to_string()));
    }

    fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for Origin {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable("origin is down".into()));
        }
        let pages = self.pages.lock().unwrap();
        let found = pages.iter().find(|(path, _)| path == request.url.path());
        let (status, body) = match found {
            Some((_, body)) => (StatusCode::OK, body.clone()),
            None => (StatusCode::NOT_FOUND, String::new()),
        };
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        Ok(Response::new(request.url.clone(), status, headers, Bytes::from(body)))
    }
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn get(path: &str) -> FetchEvent {
    FetchEvent::new(Request::get(url(path)))
}

fn navigate(path: &str) -> FetchEvent {
    FetchEvent::new(Request::navigate(url(path)))
}

async fn active_worker(
    origin: Arc<Origin>,
    caches: Arc<MemoryCacheStorage>,
) -> ServiceWorker {
    let config = WorkerConfig::default().with_origin(Url::parse(ORIGIN).unwrap());
    let (worker, _events) = ServiceWorker::new(config, caches, origin);
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    assert_eq!(worker.state().await, ServiceWorkerState::Activated);
    worker
}

#[tokio::test]
async fn api_offline_without_cache_serves_empty_list() {
    let origin = Origin::new();
    let worker = active_worker(origin.clone(), Arc::new(MemoryCacheStorage::new())).await;
    origin.go_offline();

    let response = worker.handle_fetch(get("/api/trip/42")).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.text().unwrap(), "[]");
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn route_results_offline_without_cache_serves_empty_results() {
    let origin = Origin::new();
    let worker = active_worker(origin.clone(), Arc::new(MemoryCacheStorage::new())).await;
    origin.go_offline();

    for path in ["/find_route_results?x=1", "/api/find_route_results?from=3&to=9"] {
        let response = worker.handle_fetch(get(path)).await.unwrap();
        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(
            response.text().unwrap(),
            r#"{"type":"none","results":[]}"#
        );
    }
}

#[tokio::test]
async fn api_online_response_is_kept_for_later() {
    let origin = Origin::new();
    origin.serve("/api/search_stop", r#"[{"id":7,"name":"Central"}]"#);
    let caches = Arc::new(MemoryCacheStorage::new());
    let worker = active_worker(origin.clone(), caches.clone()).await;

    let live = worker
        .handle_fetch(get("/api/search_stop?q=cen"))
        .await
        .unwrap();
    assert_eq!(live.source, ResponseSource::Network);

    let data = caches.open("busiloo-data-v1").await.unwrap();
    assert!(data
        .match_request(&Request::get(url("/api/search_stop?q=cen")))
        .await
        .unwrap()
        .is_some());

    origin.go_offline();
    let replay = worker
        .handle_fetch(get("/api/search_stop?q=cen"))
        .await
        .unwrap();
    assert_eq!(replay.source, ResponseSource::Cache);
    assert_eq!(replay.body, live.body);
}

#[tokio::test]
async fn shell_assets_are_served_without_the_network() {
    let origin = Origin::new();
    let worker = active_worker(origin.clone(), Arc::new(MemoryCacheStorage::new())).await;
    let calls = origin.calls();

    for path in worker.config().shell_assets.clone() {
        let first = worker.handle_fetch(get(&path)).await.unwrap();
        let second = worker.handle_fetch(get(&path)).await.unwrap();
        assert_eq!(first.source, ResponseSource::Cache);
        assert_eq!(first.status, second.status);
        assert_eq!(first.headers, second.headers);
        assert_eq!(first.body, second.body);
    }
    assert_eq!(origin.calls(), calls);
}

#[tokio::test]
async fn navigation_offline_falls_back_to_shell_root() {
    let origin = Origin::new();
    let worker = active_worker(origin.clone(), Arc::new(MemoryCacheStorage::new())).await;
    origin.go_offline();

    let response = worker.handle_fetch(navigate("/bus/12")).await.unwrap();
    assert_eq!(response.text().unwrap(), "<html>busiloo</html>");
}

#[tokio::test]
async fn upgrade_prunes_previous_version_partitions() {
    let origin = Origin::new();
    let caches = Arc::new(MemoryCacheStorage::new());
    let v1 = active_worker(origin.clone(), caches.clone()).await;
    v1.handle_fetch(get("/api/trip/1")).await.unwrap();

    let mut config = WorkerConfig::default().with_origin(Url::parse(ORIGIN).unwrap());
    config.partitions.shell = "busiloo-shell-v2".into();
    let (v2, _events) = ServiceWorker::new(config, caches.clone(), origin.clone());
    v2.install().await.unwrap();
    let report = v2.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["busiloo-shell-v1"]);
    let names = caches.keys().await.unwrap();
    assert!(names.contains(&"busiloo-shell-v2".to_string()));
    assert!(names.contains(&"busiloo-data-v1".to_string()));
    assert!(!names.contains(&"busiloo-shell-v1".to_string()));
}

#[tokio::test]
async fn upgrade_serves_new_shell_root_and_keeps_html_pages() {
    let origin = Origin::new();
    origin.serve("/", "v1 /");
    origin.serve("/routes", "<html>routes</html>");
    let caches = Arc::new(MemoryCacheStorage::new());

    let v1 = active_worker(origin.clone(), caches.clone()).await;
    v1.handle_fetch(navigate("/")).await.unwrap();
    v1.handle_fetch(navigate("/routes")).await.unwrap();

    origin.serve("/", "v2 /");
    let mut config = WorkerConfig::default().with_origin(Url::parse(ORIGIN).unwrap());
    config.partitions.shell = "busiloo-shell-v2".into();
    let (v2, _events) = ServiceWorker::new(config, caches.clone(), origin.clone());
    v2.install().await.unwrap();
    v2.activate().await.unwrap();

    let html = caches.open("busiloo-html-v1").await.unwrap();
    let pages = html.keys().await.unwrap();
    assert_eq!(
        pages,
        vec!["https://busiloo.test/", "https://busiloo.test/routes"]
    );

    origin.go_offline();
    let fallback = v2.handle_fetch(navigate("/bus/12")).await.unwrap();
    assert_eq!(fallback.text().unwrap(), "v2 /");

    let routes = v2.handle_fetch(navigate("/routes")).await.unwrap();
    assert_eq!(routes.text().unwrap(), "<html>routes</html>");

    origin.go_online();
    let live = v2.handle_fetch(navigate("/")).await.unwrap();
    assert_eq!(live.source, ResponseSource::Network);
}

#[tokio::test]
async fn partitions_survive_a_restart_through_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("caches.json");

    let origin = Origin::new();
    let caches = Arc::new(MemoryCacheStorage::new());
    let _worker = active_worker(origin.clone(), caches.clone()).await;
    caches.save(&store).await.unwrap();

    let restored = MemoryCacheStorage::load(&store).await.unwrap();
    let hit = restored
        .match_request(&Request::get(url("/static/busiloo.svg")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.text().unwrap(), "<svg/>");
}
