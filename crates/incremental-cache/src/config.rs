//! Cache runtime configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Path of the administration endpoint that receives broadcasts.
pub const DEFAULT_UPDATE_ROUTE: &str = "/api/cache-update";

/// Port of the local development server.
const DEV_PORT: u16 = 4321;

/// Port of the local production preview server.
const PREVIEW_PORT: u16 = 8788;

/// Configuration for a [`CacheRuntime`](crate::CacheRuntime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Origin the administration endpoint is reachable at.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the administration endpoint.
    #[serde(default = "default_update_route")]
    pub update_route: String,

    /// Whether edge-local writes are broadcast unless a call says otherwise.
    #[serde(default = "default_true")]
    pub distribute: bool,

    /// Lifetime of the in-flight revalidation marker, in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Name of the durable key-value store (`None` for the default store).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv_store: Option<String>,

    /// Log output format for hosts that install a subscriber.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Output format for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format (for development).
    #[default]
    Human,
    /// JSON format (for production/log aggregation).
    Json,
}

fn default_base_url() -> String {
    format!("http://localhost:{}", DEV_PORT)
}

fn default_update_route() -> String {
    DEFAULT_UPDATE_ROUTE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_lock_ttl_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            update_route: default_update_route(),
            distribute: true,
            lock_ttl_secs: default_lock_ttl_secs(),
            kv_store: None,
            log_format: LogFormat::default(),
        }
    }
}

impl CacheConfig {
    /// Load config from a TOML file, or JSON when the path ends in `.json`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Self = if path.ends_with(".json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path))?
        };
        config.base_url = trim_trailing_slash(config.base_url);
        Ok(config)
    }

    /// Defaults with the base URL resolved from the process environment.
    pub fn from_env() -> Self {
        Self {
            base_url: resolve_base_url(|name| std::env::var(name).ok()),
            ..Self::default()
        }
    }

    /// Full URL of the administration endpoint.
    pub fn broadcast_route(&self) -> String {
        format!("{}{}", self.base_url, self.update_route)
    }

    /// Lifetime of the in-flight revalidation marker.
    pub fn lock_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Resolve the public origin of this deployment.
///
/// `CACHE_BASE_URL` wins; otherwise a localhost URL on `PORT`, or on the
/// preview port when `CACHE_ENV=production`, or the dev port.
pub fn resolve_base_url<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let url = match lookup("CACHE_BASE_URL").filter(|v| !v.is_empty()) {
        Some(url) => url,
        None => {
            let port = lookup("PORT")
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or_else(|| match lookup("CACHE_ENV").as_deref() {
                    Some("production") => PREVIEW_PORT,
                    _ => DEV_PORT,
                });
            format!("http://localhost:{}", port)
        }
    };
    trim_trailing_slash(url)
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
