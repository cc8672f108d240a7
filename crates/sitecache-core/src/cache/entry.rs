use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::net::{Request, Response, ResponseKind};

/// Metadata of one stored response.
///
/// On disk an entry is a single file: this struct as one line of compact
/// JSON, a newline, then the raw body bytes. Replacing an entry is one
/// rename, so metadata and body can never disagree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    /// Request identity (`"GET <url>"`).
    pub key: String,
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub kind: ResponseKind,
    pub body_len: usize,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    pub(crate) fn new(request: &Request, response: &Response) -> Self {
        Self {
            key: request.cache_key(),
            url: request.url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            kind: response.kind,
            body_len: response.body.len(),
            cached_at: Utc::now(),
        }
    }

    /// Header line plus body, ready to be written in one go.
    pub(crate) fn encode(&self, body: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
        // Compact JSON escapes newlines inside strings, so the first raw
        // newline always ends the header
        let mut bytes = serde_json::to_vec(self)?;
        bytes.reserve(body.len() + 1);
        bytes.push(b'\n');
        bytes.extend_from_slice(body);
        Ok(bytes)
    }

    pub(crate) fn decode(mut bytes: Vec<u8>) -> Result<(Self, Vec<u8>), serde_json::Error> {
        let split = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
        let meta: Self = serde_json::from_slice(&bytes[..split])?;
        let body = bytes.split_off((split + 1).min(bytes.len()));
        Ok((meta, body))
    }

    pub(crate) fn into_response(self, body: Vec<u8>) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body,
            kind: self.kind,
            from_cache: true,
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use url::Url;

    fn entry() -> CachedResponse {
        let request = Request::get(Url::parse("http://localhost:8080/index.html").unwrap());
        let response = Response::new(200, "<html></html>").with_header("Content-Type", "text/html");
        CachedResponse::new(&request, &response)
    }

    #[test]
    fn test_new_records_identity() {
        let e = entry();
        assert_eq!(e.key, "GET http://localhost:8080/index.html");
        assert_eq!(e.body_len, 13);
        assert_eq!(e.headers.get("content-type").map(String::as_str), Some("text/html"));
    }

    #[test]
    fn test_encoded_entry_splits_at_first_newline() {
        let body = b"line one\nline two\n".to_vec();
        let bytes = entry().encode(&body).unwrap();
        let (meta, decoded) = CachedResponse::decode(bytes).unwrap();
        assert_eq!(meta.key, "GET http://localhost:8080/index.html");
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(CachedResponse::decode(b"not json\nbody".to_vec()).is_err());
    }

    #[test]
    fn test_into_response_marks_cached() {
        let response = entry().into_response(b"<html></html>".to_vec());
        assert!(response.from_cache);
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "<html></html>");
    }

    #[test]
    fn test_age_display() {
        let mut e = entry();
        assert_eq!(e.age_display(), "just now");

        e.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(e.age_display(), "5m ago");

        e.cached_at = Utc::now() - Duration::minutes(150);
        assert_eq!(e.age_display(), "2h ago");

        e.cached_at = Utc::now() - Duration::days(3);
        assert_eq!(e.age_display(), "3d ago");
    }
}
