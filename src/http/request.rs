//! Inbound request record handed to the function pipeline.

use bytes::Bytes;
use fnshim_sdk::RequestRecord;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::warn;

/// A fully buffered HTTP request.
///
/// Header lookups go through [`HeaderMap`] and are case-insensitive.
#[derive(Debug, Clone)]
pub struct FunctionRequest {
    /// HTTP method.
    pub method: Method,
    /// Path and query.
    pub url: String,
    /// HTTP headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

impl FunctionRequest {
    /// Create a new request with no headers and an empty body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header. Names or values that are not valid HTTP are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!("Dropping invalid header {:?}", name),
        }
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// The path component of the URL.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(path, _)| path)
    }

    /// Get a header value. Missing and non-UTF-8 values both yield `None`.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The declared content type, verbatim.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Headers as a flat, ordered map. Repeated headers are joined with `", "`.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &self.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            match map.entry(name.as_str().to_string()) {
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                Entry::Vacant(entry) => {
                    entry.insert(value.into_owned());
                }
            }
        }
        map
    }

    /// Copy of this request that can cross a process boundary.
    pub fn to_record(&self) -> RequestRecord {
        RequestRecord {
            method: self.method.to_string(),
            url: self.url.clone(),
            headers: self.header_map(),
        }
    }
}

impl Default for FunctionRequest {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = FunctionRequest::new(Method::POST, "/").header("Event-ID", "abc");
        assert_eq!(request.get_header("event-id"), Some("abc"));
        assert_eq!(request.get_header("EVENT-ID"), Some("abc"));
        assert_eq!(request.get_header("event-type"), None);
    }

    #[test]
    fn test_path_strips_query() {
        let request = FunctionRequest::new(Method::GET, "/healthz?verbose=1");
        assert_eq!(request.path(), "/healthz");
        assert_eq!(FunctionRequest::default().path(), "/");
    }

    #[test]
    fn test_header_map_joins_repeated_headers() {
        let request = FunctionRequest::new(Method::GET, "/")
            .header("Accept", "text/plain")
            .header("accept", "application/json")
            .header("X", "y");
        let map = request.header_map();
        assert_eq!(map.get("accept").map(String::as_str), Some("text/plain, application/json"));
        assert_eq!(map.get("x").map(String::as_str), Some("y"));
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let request = FunctionRequest::new(Method::GET, "/").header("bad name", "v");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_to_record() {
        let request = FunctionRequest::new(Method::PATCH, "/?a=b")
            .header("content-type", "text/plain")
            .body("hello");
        let record = request.to_record();
        assert_eq!(record.method, "PATCH");
        assert_eq!(record.url, "/?a=b");
        assert_eq!(record.headers.len(), 1);
        assert_eq!(request.body, Bytes::from_static(b"hello"));
    }
}
