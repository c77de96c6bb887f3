//! Maps a request to the fetch strategy that answers it.

use busiloo_net::{Request, RequestMode};

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Network, then the data partition, then a synthesized JSON body.
    NetworkFirst,
    /// Network, then the HTML partition, then the cached shell root.
    DynamicHtml,
    /// Any partition, then the network. Nothing is stored.
    CacheFirst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::DynamicHtml => "dynamic-html",
            Strategy::CacheFirst => "cache-first",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing rules. Pure: no I/O, no state.
#[derive(Debug, Clone)]
pub struct Router {
    api_prefixes: Vec<String>,
    route_results_marker: String,
}

impl Router {
    pub fn new(api_prefixes: Vec<String>, route_results_marker: String) -> Self {
        Self {
            api_prefixes,
            route_results_marker,
        }
    }

    /// Pick a strategy from the URL path (query included or not) and the request mode.
    ///
    /// Navigations win over everything, then API prefixes and route-result URLs.
    pub fn route(&self, path: &str, mode: RequestMode) -> Strategy {
        if mode == RequestMode::Navigate {
            return Strategy::DynamicHtml;
        }
        if self.is_api(path) {
            return Strategy::NetworkFirst;
        }
        Strategy::CacheFirst
    }

    /// [`Router::route`] for a full request.
    pub fn route_request(&self, request: &Request) -> Strategy {
        self.route(request.url.path(), request.mode)
    }

    /// Whether the URL asks for route search results.
    pub fn is_route_results(&self, url: &str) -> bool {
        !self.route_results_marker.is_empty() && url.contains(&self.route_results_marker)
    }

    fn is_api(&self, path: &str) -> bool {
        self.api_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.is_route_results(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerConfig;

    fn router() -> Router {
        WorkerConfig::default().router()
    }

    #[test]
    fn test_api_prefixes_are_network_first() {
        let router = router();
        assert_eq!(
            router.route("/union/stops", RequestMode::Cors),
            Strategy::NetworkFirst
        );
        assert_eq!(
            router.route("/union/stops/17", RequestMode::Cors),
            Strategy::NetworkFirst
        );
        assert_eq!(
            router.route("/api/trip/42", RequestMode::Cors),
            Strategy::NetworkFirst
        );
    }

    #[test]
    fn test_prefix_is_not_a_substring_match() {
        let router = router();
        assert_eq!(
            router.route("/static/api/logo.svg", RequestMode::Cors),
            Strategy::CacheFirst
        );
        assert_eq!(router.route("/api", RequestMode::Cors), Strategy::CacheFirst);
        assert_eq!(
            router.route("/union/routes", RequestMode::Cors),
            Strategy::CacheFirst
        );
    }

    #[test]
    fn test_route_results_are_network_first() {
        let router = router();
        assert_eq!(
            router.route("/find_route_results", RequestMode::Cors),
            Strategy::NetworkFirst
        );
        assert_eq!(
            router.route("/api/find_route_results", RequestMode::Cors),
            Strategy::NetworkFirst
        );
    }

    #[test]
    fn test_navigation_wins() {
        let router = router();
        assert_eq!(router.route("/", RequestMode::Navigate), Strategy::DynamicHtml);
        assert_eq!(
            router.route("/api/trip/42", RequestMode::Navigate),
            Strategy::DynamicHtml
        );
    }

    #[test]
    fn test_static_assets_are_cache_first() {
        let router = router();
        assert_eq!(
            router.route("/static/home.css", RequestMode::NoCors),
            Strategy::CacheFirst
        );
        assert_eq!(router.route("/", RequestMode::Cors), Strategy::CacheFirst);
    }

    #[test]
    fn test_route_request_ignores_query() {
        let router = router();
        let request = Request::parse("https://busiloo.test/static/app.js?api/=1").unwrap();
        assert_eq!(router.route_request(&request), Strategy::CacheFirst);
    }

    #[test]
    fn test_empty_marker_never_matches() {
        let router = Router::new(vec!["/api/".into()], String::new());
        assert!(!router.is_route_results("/anything"));
    }
}
