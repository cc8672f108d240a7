//! Network access for the worker.
//!
//! Handlers reach the network only through the `Fetcher` trait, so the
//! routing logic can run against an in-process fake in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use tracing::debug;
use url::Url;

use super::request::{Request, Response, ResponseKind};
use crate::error::FetchError;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform one network round trip. A resolved response of any status is
    /// `Ok`; only transport failures are `Err`.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `Fetcher` backed by reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    /// `origin` decides whether a response is same-origin (`basic`).
    pub fn new(origin: Url) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("sitecache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, origin })
    }

    fn kind_for(&self, url: &Url) -> ResponseKind {
        if url.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

/// Anything that went wrong on the wire is `Unreachable`; only errors in
/// building the request or following redirects stay `Http`.
fn transport_error(url: &Url, e: reqwest::Error) -> FetchError {
    if e.is_builder() || e.is_redirect() {
        FetchError::Http(e)
    } else {
        FetchError::unreachable(url.as_str(), e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", request.method, e)))?;

        let mut headers = header::HeaderMap::new();
        for (name, value) in &request.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let status = response.status().as_u16();
        let kind = self.kind_for(response.url());
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        // A connection dropped mid-body is as offline as one never opened
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&request.url, e))?
            .to_vec();

        debug!(url = %request.url, status, "Network response");

        Ok(Response {
            status,
            headers: response_headers,
            body,
            kind,
            from_cache: false,
        })
    }
}
