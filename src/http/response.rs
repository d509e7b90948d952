//! Response record produced by the function pipeline.

use bytes::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use std::collections::HashMap;

/// HTTP response before it is handed back to hyper.
#[derive(Debug, Clone)]
pub struct FunctionResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// HTTP headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Option<Bytes>,
}

impl FunctionResponse {
    /// Create a new FunctionResponse with the given status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Create an empty 200 response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Create a 200 response with a JSON body.
    pub fn json<T: Serialize + ?Sized>(data: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(data)?;
        Ok(Self::new(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(body))
    }

    /// Create a 200 plain-text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .body(content.into())
    }

    /// Create a plain-text response with the given status.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::text(message).with_status(status)
    }

    /// Replace the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header to the response.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Get the body as text if present.
    pub fn text_body(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Parse the body as JSON if present.
    pub fn json_body<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Option<Result<T, serde_json::Error>> {
        self.body.as_ref().map(|b| serde_json::from_slice(b))
    }
}

impl Default for FunctionResponse {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_json_response() {
        let response = FunctionResponse::json(&json!({"result": 42})).unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        let body: Value = response.json_body().unwrap().unwrap();
        assert_eq!(body, json!({"result": 42}));
    }

    #[test]
    fn test_error_response() {
        let response = FunctionResponse::error(StatusCode::REQUEST_TIMEOUT, "too slow");
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.text_body(), Some("too slow".to_string()));
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("text/plain")
        );
    }
}
