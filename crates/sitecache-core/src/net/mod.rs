//! Request/response types and the network seam.

pub mod client;
pub mod request;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{Fetcher, HttpFetcher};
pub use request::{Request, Response, ResponseKind};
