//! Worker configuration.
//!
//! A single immutable `WorkerConfig` is built once when the host starts and
//! shared (via `Arc`) by every event handler. It carries the cache version tag,
//! the precache manifest, routing rules and sync task names.
//!
//! Configuration is read from JSON, by default at
//! `~/.config/sitecache/config.json`. Every field has a default, so a missing
//! file or a partial file are both valid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::WorkerError;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sitecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_ORIGIN: &str = "http://localhost:8080/";

/// Bump on deploy to invalidate every previously cached asset.
const DEFAULT_VERSION: &str = "v1";

const DEFAULT_CACHE_PREFIX: &str = "account-ability-cache";

const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/thank-you.html",
    "/offline.html",
    "/assets/css/styles.css",
    "/assets/js/main.js",
    "/assets/js/utils.js",
    "/assets/js/forms.js",
    "/assets/js/parallax.js",
    "/assets/js/animations.js",
];

const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

const DEFAULT_EXCLUDED_HOSTS: &[&str] = &["google-analytics.com", "analytics", "chrome-extension"];

const DEFAULT_EXCLUDED_SCHEMES: &[&str] = &["chrome-extension", "moz-extension"];

const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
    "js", "css", "woff", "woff2", "ttf", "png", "jpg", "jpeg", "gif", "svg", "ico",
];

const DEFAULT_SUBMIT_ENDPOINT: &str = "/submit-form";

const DEFAULT_REFRESH_PAGES: &[&str] = &["/", "/index.html", "/assets/css/styles.css"];

pub const FORM_SYNC_TAG: &str = "contact-form-sync";

pub const CONTENT_SYNC_TAG: &str = "content-sync";

/// Minimum interval between periodic content refreshes.
const DEFAULT_CONTENT_SYNC_INTERVAL_HOURS: i64 = 24;

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Site whose requests are intercepted; manifest paths resolve against it.
    pub origin: Url,
    pub cache_prefix: String,
    pub version: String,
    pub precache: Vec<String>,
    pub offline_page: String,
    /// Substrings matched against the request host.
    pub excluded_hosts: Vec<String>,
    pub excluded_schemes: Vec<String>,
    /// Lowercase extensions, without the leading dot.
    pub asset_extensions: Vec<String>,
    pub submit_endpoint: String,
    pub refresh_pages: Vec<String>,
    pub form_sync_tag: String,
    pub content_sync_tag: String,
    pub content_sync_interval_hours: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            version: DEFAULT_VERSION.to_string(),
            precache: owned(DEFAULT_PRECACHE),
            offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
            excluded_hosts: owned(DEFAULT_EXCLUDED_HOSTS),
            excluded_schemes: owned(DEFAULT_EXCLUDED_SCHEMES),
            asset_extensions: owned(DEFAULT_ASSET_EXTENSIONS),
            submit_endpoint: DEFAULT_SUBMIT_ENDPOINT.to_string(),
            refresh_pages: owned(DEFAULT_REFRESH_PAGES),
            form_sync_tag: FORM_SYNC_TAG.to_string(),
            content_sync_tag: CONTENT_SYNC_TAG.to_string(),
            content_sync_interval_hours: DEFAULT_CONTENT_SYNC_INTERVAL_HOURS,
        }
    }
}

impl WorkerConfig {
    /// Load from an explicit path, or the default config location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Per-origin durable storage root, e.g. `~/.cache/sitecache/localhost_8080`.
    pub fn default_data_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(self.origin_slug()))
    }

    fn origin_slug(&self) -> String {
        let host = self.origin.host_str().unwrap_or("local");
        match self.origin.port() {
            Some(port) => format!("{}_{}", host, port),
            None => host.to_string(),
        }
    }

    /// Name of the cache owned by this version, e.g. `account-ability-cache-v1`.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Same configuration pinned to another version tag.
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..self.clone()
        }
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, WorkerError> {
        self.origin
            .join(path)
            .map_err(|e| WorkerError::InvalidPath {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn offline_page_url(&self) -> Result<Url, WorkerError> {
        self.resolve(&self.offline_page)
    }

    pub fn submit_url(&self) -> Result<Url, WorkerError> {
        self.resolve(&self.submit_endpoint)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }
}
