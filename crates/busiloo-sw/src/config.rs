//! Worker configuration: partition names, shell manifest and routing rules.

use std::path::Path;

use busiloo_net::Request;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::router::Router;
use crate::SwError;

/// Names of the cache partitions owned by this worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionNames {
    /// Precached application shell.
    pub shell: String,
    /// API responses.
    pub data: String,
    /// Navigated HTML pages.
    pub html: String,
}

impl Default for PartitionNames {
    fn default() -> Self {
        Self {
            shell: "busiloo-shell-v1".to_string(),
            data: "busiloo-data-v1".to_string(),
            html: "busiloo-html-v1".to_string(),
        }
    }
}

impl PartitionNames {
    /// Partitions that survive activation.
    pub fn allow_list(&self) -> [&str; 3] {
        [self.shell.as_str(), self.data.as_str(), self.html.as_str()]
    }

    /// Whether `name` belongs to this worker version.
    pub fn is_current(&self, name: &str) -> bool {
        self.allow_list().contains(&name)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is registered for. Shell paths resolve against it.
    pub origin: Url,

    /// Partition names.
    pub partitions: PartitionNames,

    /// Root document served to navigations when everything else misses.
    pub shell_root: String,

    /// Assets precached at install, in order.
    pub shell_assets: Vec<String>,

    /// Path prefixes handled network-first.
    pub api_prefixes: Vec<String>,

    /// URL fragment marking route search results.
    pub route_results_marker: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            partitions: PartitionNames::default(),
            shell_root: "/".to_string(),
            shell_assets: vec![
                "/".to_string(),
                "/static/home.css".to_string(),
                "/static/busiloo.svg".to_string(),
                "/static/translater.js".to_string(),
            ],
            api_prefixes: vec!["/union/stops".to_string(), "/api/".to_string()],
            route_results_marker: "/find_route_results".to_string(),
        }
    }
}

fn default_origin() -> Url {
    Url::parse("http://localhost:8000/").expect("default origin is a valid URL")
}

impl WorkerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SwError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Check the configuration for mistakes that would break install or routing.
    pub fn validate(&self) -> Result<(), SwError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(SwError::Config(format!(
                "origin must be http(s): {}",
                self.origin
            )));
        }

        let names = self.partitions.allow_list();
        if names.iter().any(|n| n.is_empty()) {
            return Err(SwError::Config("partition names must not be empty".into()));
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(SwError::Config("partition names must be distinct".into()));
        }

        if !self.shell_assets.iter().any(|a| a == &self.shell_root) {
            return Err(SwError::Config(format!(
                "shell_assets must include the shell root {:?}",
                self.shell_root
            )));
        }

        if let Some(bad) = self.api_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(SwError::Config(format!(
                "api prefix must start with '/': {bad:?}"
            )));
        }

        Ok(())
    }

    /// Resolve a path or absolute URL against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, SwError> {
        self.origin
            .join(path)
            .map_err(|e| SwError::Config(format!("cannot resolve {path:?}: {e}")))
    }

    /// GET requests for every shell asset, in manifest order.
    pub fn shell_requests(&self) -> Result<Vec<Request>, SwError> {
        self.shell_assets
            .iter()
            .map(|asset| self.resolve(asset).map(Request::get))
            .collect()
    }

    /// The request the shell root is cached under.
    pub fn shell_root_request(&self) -> Result<Request, SwError> {
        self.resolve(&self.shell_root).map(Request::get)
    }

    /// Build the request router for these rules.
    pub fn router(&self) -> Router {
        Router::new(self.api_prefixes.clone(), self.route_results_marker.clone())
    }
}
