//! Fetch interception.
//!
//! Routing order: non-GET and excluded requests pass through untouched,
//! static assets are served cache-first, everything else network-first with
//! the cache and then the offline page as fallbacks.

use tracing::{debug, warn};

use super::ServiceWorker;
use crate::error::{WorkerError, WorkerResult};
use crate::net::{Request, Response, ResponseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not handled by the worker; the request goes to the network as-is.
    Passthrough,
    Asset,
    Document,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchDecision {
    /// The worker declined to respond.
    Passthrough,
    Respond(Response),
}

impl ServiceWorker {
    pub fn route(&self, request: &Request) -> Route {
        if !request.is_get() {
            return Route::Passthrough;
        }
        if self.is_excluded(request) {
            return Route::Passthrough;
        }
        if self.is_asset_path(request.url.path()) {
            Route::Asset
        } else {
            Route::Document
        }
    }

    fn is_excluded(&self, request: &Request) -> bool {
        let scheme = request.url.scheme();
        if self.config.excluded_schemes.iter().any(|s| s == scheme) {
            return true;
        }
        if scheme != "http" && scheme != "https" {
            return true;
        }
        let host = request.url.host_str().unwrap_or("");
        self.config
            .excluded_hosts
            .iter()
            .any(|pattern| host.contains(pattern.as_str()))
    }

    fn is_asset_path(&self, path: &str) -> bool {
        match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => {
                let ext = ext.to_ascii_lowercase();
                self.config.asset_extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }

    /// Handle one intercepted request.
    ///
    /// `Err` only when the request cannot be answered at all: the network
    /// failed and neither the cache nor the offline page can stand in.
    pub async fn handle_fetch(&self, request: &Request) -> WorkerResult<FetchDecision> {
        match self.route(request) {
            Route::Passthrough => {
                debug!(method = %request.method, url = %request.url, "Passing through");
                Ok(FetchDecision::Passthrough)
            }
            Route::Asset => self.cache_first(request).await.map(FetchDecision::Respond),
            Route::Document => self.network_first(request).await.map(FetchDecision::Respond),
        }
    }

    async fn cache_first(&self, request: &Request) -> WorkerResult<Response> {
        if let Some(cached) = self.cache_match(request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(cached);
        }

        let response = self
            .network
            .fetch(request)
            .await
            .map_err(|source| WorkerError::Fetch {
                url: request.url.to_string(),
                source,
            })?;

        // Only complete same-origin responses are worth keeping
        if response.status == 200 && response.kind == ResponseKind::Basic {
            self.cache_put(request, &response).await;
        }
        Ok(response)
    }

    async fn network_first(&self, request: &Request) -> WorkerResult<Response> {
        let source = match self.network.fetch(request).await {
            Ok(response) => {
                self.cache_put(request, &response).await;
                return Ok(response);
            }
            Err(e) => e,
        };

        warn!(url = %request.url, error = %source, "Network failed, falling back to cache");
        if let Some(cached) = self.cache_match(request).await {
            return Ok(cached);
        }

        if request.accepts_html() {
            let offline = Request::get(self.config.offline_page_url()?);
            if let Some(page) = self.cache_match(&offline).await {
                debug!(url = %request.url, "Serving offline page");
                return Ok(page);
            }
        }

        Err(WorkerError::Fetch {
            url: request.url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use url::Url;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::net::fake::FakeNetwork;

    const ORIGIN: &str = "http://localhost:8080";

    fn worker(dir: &std::path::Path, net: Arc<FakeNetwork>) -> ServiceWorker {
        ServiceWorker::new(Arc::new(WorkerConfig::default()), dir, net)
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    #[test]
    fn test_routing_rules() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(dir.path(), Arc::new(FakeNetwork::new()));

        assert_eq!(w.route(&Request::new("POST", url("/submit-form"))), Route::Passthrough);
        assert_eq!(
            w.route(&Request::parse("GET", "https://www.google-analytics.com/collect").unwrap()),
            Route::Passthrough
        );
        assert_eq!(
            w.route(&Request::parse("GET", "https://analytics.example.com/a.js").unwrap()),
            Route::Passthrough
        );
        assert_eq!(
            w.route(&Request::parse("GET", "chrome-extension://abcdef/script.js").unwrap()),
            Route::Passthrough
        );
        assert_eq!(w.route(&Request::get(url("/assets/js/main.js"))), Route::Asset);
        assert_eq!(w.route(&Request::get(url("/img/LOGO.PNG"))), Route::Asset);
        assert_eq!(w.route(&Request::get(url("/fonts/inter.woff2"))), Route::Asset);
        assert_eq!(w.route(&Request::get(url("/"))), Route::Document);
        assert_eq!(w.route(&Request::get(url("/about.html"))), Route::Document);
        assert_eq!(w.route(&Request::get(url("/v1.js/"))), Route::Document);
        assert_eq!(w.route(&Request::get(url("/data.json"))), Route::Document);
    }

    #[tokio::test]
    async fn test_cached_asset_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        let w = worker(dir.path(), net.clone());
        let request = Request::get(url("/assets/css/styles.css"));
        w.current_cache()
            .await
            .unwrap()
            .put(&request, &Response::new(200, "cached css"))
            .await
            .unwrap();

        let decision = w.handle_fetch(&request).await.unwrap();
        let FetchDecision::Respond(response) = decision else {
            panic!("expected a response");
        };
        assert_eq!(response.text(), "cached css");
        assert!(response.from_cache);
        assert!(net.calls().is_empty());
    }

    #[tokio::test]
    async fn test_asset_miss_fetches_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        net.route(url("/app.js").as_str(), Response::new(200, "js"));
        let w = worker(dir.path(), net.clone());
        let request = Request::get(url("/app.js"));

        w.handle_fetch(&request).await.unwrap();
        w.handle_fetch(&request).await.unwrap();
        assert_eq!(net.calls_to(url("/app.js").as_str()), 1);
    }

    #[tokio::test]
    async fn test_asset_error_status_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        let w = worker(dir.path(), net.clone());
        let request = Request::get(url("/missing.png"));

        let FetchDecision::Respond(response) = w.handle_fetch(&request).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.status, 404);
        assert!(w.current_cache().await.unwrap().match_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cross_origin_asset_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        let cdn = "https://cdn.example.com/font.woff2";
        net.route(cdn, Response::new(200, "font").with_kind(ResponseKind::Cors));
        let w = worker(dir.path(), net.clone());
        let request = Request::parse("GET", cdn).unwrap();

        w.handle_fetch(&request).await.unwrap();
        w.handle_fetch(&request).await.unwrap();
        assert_eq!(net.calls_to(cdn), 2);
    }

    #[tokio::test]
    async fn test_asset_offline_miss_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        net.set_offline(true);
        let w = worker(dir.path(), net);

        let err = w.handle_fetch(&Request::get(url("/app.js"))).await.unwrap_err();
        assert!(matches!(err, WorkerError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_document_prefers_network_and_refreshes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        net.route(url("/index.html").as_str(), Response::new(200, "fresh"));
        let w = worker(dir.path(), net);
        let request = Request::navigation(url("/index.html"));
        let cache = w.current_cache().await.unwrap();
        cache.put(&request, &Response::new(200, "stale")).await.unwrap();

        let FetchDecision::Respond(response) = w.handle_fetch(&request).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.text(), "fresh");
        assert!(!response.from_cache);
        assert_eq!(cache.match_request(&request).await.unwrap().unwrap().text(), "fresh");
    }

    #[tokio::test]
    async fn test_document_offline_falls_back_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        net.set_offline(true);
        let w = worker(dir.path(), net);
        let request = Request::navigation(url("/about.html"));
        w.current_cache()
            .await
            .unwrap()
            .put(&request, &Response::new(200, "about"))
            .await
            .unwrap();

        let FetchDecision::Respond(response) = w.handle_fetch(&request).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.text(), "about");
    }

    #[tokio::test]
    async fn test_document_offline_serves_offline_page_for_html() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        net.set_offline(true);
        let w = worker(dir.path(), net);
        w.current_cache()
            .await
            .unwrap()
            .put(&Request::get(url("/offline.html")), &Response::new(200, "<p>You are offline</p>"))
            .await
            .unwrap();

        let FetchDecision::Respond(page) =
            w.handle_fetch(&Request::navigation(url("/pricing"))).await.unwrap()
        else {
            panic!("expected a response");
        };
        assert_eq!(page.text(), "<p>You are offline</p>");

        // Non-HTML requests get the failure instead
        let json = Request::get(url("/api/status")).with_header("accept", "application/json");
        assert!(w.handle_fetch(&json).await.is_err());
    }

    #[tokio::test]
    async fn test_excluded_host_never_touches_cache() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        let w = worker(dir.path(), net);
        let request = Request::parse("GET", "https://www.google-analytics.com/analytics.js").unwrap();

        assert_eq!(w.handle_fetch(&request).await.unwrap(), FetchDecision::Passthrough);
        assert!(w.caches().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_write_failure_does_not_fail_response() {
        let dir = tempfile::tempdir().unwrap();
        let net = Arc::new(FakeNetwork::new());
        net.route(url("/").as_str(), Response::new(200, "home"));
        // Block cache storage: a file where the caches directory should be
        std::fs::write(dir.path().join("caches"), b"").unwrap();
        let w = worker(dir.path(), net);

        let FetchDecision::Respond(response) =
            w.handle_fetch(&Request::navigation(url("/"))).await.unwrap()
        else {
            panic!("expected a response");
        };
        assert_eq!(response.text(), "home");
    }
}
