use futures::future::try_join_all;
use tracing::{error, info};

use super::ServiceWorker;
use crate::error::{WorkerError, WorkerResult};
use crate::net::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub cache_name: String,
    pub precached: usize,
    /// The worker asks to be activated without waiting for open pages to close.
    pub skip_waiting: bool,
}

impl ServiceWorker {
    /// Precache every manifest entry into the versioned cache.
    ///
    /// All-or-nothing: every entry is fetched before anything is written, and
    /// a single transport failure or non-OK status fails the install.
    pub async fn install(&self) -> WorkerResult<InstallOutcome> {
        let cache_name = self.config.cache_name();
        info!(cache = %cache_name, entries = self.config.precache.len(), "Installing");

        let mut requests = Vec::with_capacity(self.config.precache.len());
        for path in &self.config.precache {
            requests.push((path.as_str(), Request::get(self.config.resolve(path)?)));
        }

        let fetches = requests.iter().map(|(path, request)| async move {
            let response = self
                .network
                .fetch(request)
                .await
                .map_err(|source| WorkerError::InstallFailed {
                    path: path.to_string(),
                    source,
                })?;
            if !response.ok() {
                return Err(WorkerError::PrecacheStatus {
                    path: path.to_string(),
                    status: response.status,
                });
            }
            Ok::<_, WorkerError>((request, response))
        });

        let fetched = match try_join_all(fetches).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(cache = %cache_name, error = %e, "Precaching failed");
                return Err(e);
            }
        };

        let cache = self.current_cache().await?;
        for (request, response) in &fetched {
            cache.put(request, response).await?;
        }

        info!(cache = %cache_name, precached = fetched.len(), "Precached assets");
        Ok(InstallOutcome {
            cache_name,
            precached: fetched.len(),
            skip_waiting: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::net::fake::FakeNetwork;
    use crate::net::Response;

    fn config() -> WorkerConfig {
        WorkerConfig {
            precache: vec!["/".to_string(), "/offline.html".to_string(), "/app.js".to_string()],
            ..WorkerConfig::default()
        }
    }

    fn site() -> Arc<FakeNetwork> {
        let net = Arc::new(FakeNetwork::new());
        net.route("http://localhost:8080/", Response::new(200, "home"));
        net.route("http://localhost:8080/offline.html", Response::new(200, "offline"));
        net.route("http://localhost:8080/app.js", Response::new(200, "js"));
        net
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ServiceWorker::new(Arc::new(config()), dir.path(), site());

        let outcome = worker.install().await.unwrap();
        assert_eq!(outcome.cache_name, "account-ability-cache-v1");
        assert_eq!(outcome.precached, 3);
        assert!(outcome.skip_waiting);

        let keys = worker.current_cache().await.unwrap().keys().await.unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn test_install_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ServiceWorker::new(Arc::new(config()), dir.path(), site());

        worker.install().await.unwrap();
        let cache = worker.current_cache().await.unwrap();
        let first: Vec<_> = cache.entries().await.unwrap().into_iter().map(|e| (e.key, e.status, e.body_len)).collect();

        worker.install().await.unwrap();
        let second: Vec<_> = cache.entries().await.unwrap().into_iter().map(|e| (e.key, e.status, e.body_len)).collect();
        assert_eq!(first, second);
        assert_eq!(worker.caches().keys().await.unwrap(), vec!["account-ability-cache-v1"]);
    }

    #[tokio::test]
    async fn test_one_failed_fetch_fails_install_and_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let net = site();
        net.fail("http://localhost:8080/app.js");
        let worker = ServiceWorker::new(Arc::new(config()), dir.path(), net);

        let err = worker.install().await.unwrap_err();
        assert!(err.is_install_fatal());
        assert!(matches!(err, WorkerError::InstallFailed { ref path, .. } if path == "/app.js"));
        assert!(worker.caches().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_entry_fails_install() {
        let dir = tempfile::tempdir().unwrap();
        let net = site();
        net.route("http://localhost:8080/offline.html", Response::new(404, "missing"));
        let worker = ServiceWorker::new(Arc::new(config()), dir.path(), net);

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, WorkerError::PrecacheStatus { status: 404, .. }));
    }
}
