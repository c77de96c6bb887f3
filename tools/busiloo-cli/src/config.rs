//! Config file for the CLI host: worker settings plus HTTP and logging.

use std::path::{Path, PathBuf};

use anyhow::Context;
use busiloo_common::LogConfig;
use busiloo_net::LoaderConfig;
use busiloo_sw::WorkerConfig;
use serde::Deserialize;

/// Everything the config file may set. Worker fields sit at the top level.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub worker: WorkerConfig,
    pub loader: LoaderConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Read `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }
}

/// `<cache dir>/busiloo/caches.json`, or `./busiloo/caches.json` without a cache dir.
pub fn default_store_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("busiloo")
        .join("caches.json")
}
