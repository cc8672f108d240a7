//! The offline cache worker.
//!
//! `ServiceWorker` owns no mutable state: it holds the shared configuration,
//! a handle to the origin's cache storage, the data directory of the
//! submission store, and the network. Any number of instances may run at
//! once against the same storage; every handler is safe to re-run.
//!
//! Handlers live in one file per event:
//! - `install`: precache the manifest into the versioned cache
//! - `activate`: purge caches of other versions
//! - `fetch`: route intercepted requests (cache-first / network-first)
//! - `sync`: deliver queued submissions, refresh main pages

pub mod activate;
pub mod fetch;
pub mod install;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::cache::{CacheStorage, NamedCache};
use crate::config::WorkerConfig;
use crate::error::StorageError;
use crate::net::{Fetcher, Request, Response};

pub use activate::ActivateOutcome;
pub use fetch::{FetchDecision, Route};
pub use install::InstallOutcome;
pub use sync::{RefreshReport, SyncReport};

#[derive(Clone)]
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    caches: CacheStorage,
    data_dir: PathBuf,
    network: Arc<dyn Fetcher>,
}

impl ServiceWorker {
    pub fn new(config: Arc<WorkerConfig>, data_dir: &Path, network: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            caches: CacheStorage::new(data_dir),
            data_dir: data_dir.to_path_buf(),
            network,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    /// The cache named after this worker's version.
    pub async fn current_cache(&self) -> Result<NamedCache, StorageError> {
        self.caches.open(&self.config.cache_name()).await
    }

    /// Store a copy of a response; failures are logged and swallowed.
    async fn cache_put(&self, request: &Request, response: &Response) {
        let result = match self.current_cache().await {
            Ok(cache) => cache.put(request, response).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(url = %request.url, error = %e, "Failed to cache response");
        }
    }

    /// Cache lookup where a storage error counts as a miss.
    async fn cache_match(&self, request: &Request) -> Option<Response> {
        let result = match self.current_cache().await {
            Ok(cache) => cache.match_request(request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }
}
