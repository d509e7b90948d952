//! Error type for the fnshim runtime.

use crate::http::FunctionResponse;
use hyper::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring the shim or serving a request.
///
/// Anything that reaches the HTTP layer as a `ShimError` is answered with a
/// generic 500, except request bodies that could not be read (413 or 400).
/// Timeouts and handler-reported errors never become a `ShimError`.
#[derive(Debug, Error)]
pub enum ShimError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("handler module not found at {}", .0.display())]
    ModuleNotFound(PathBuf),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("malformed request body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("handler fault: {0}")]
    HandlerFault(String),

    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<ShimError> for FunctionResponse {
    fn from(err: ShimError) -> Self {
        match err {
            ShimError::PayloadTooLarge(_) => {
                FunctionResponse::error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
            }
            ShimError::BodyRead(_) => {
                FunctionResponse::error(StatusCode::BAD_REQUEST, "Failed to read request body")
            }
            _ => FunctionResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_maps_to_generic_500() {
        let response: FunctionResponse = ShimError::HandlerFault("secret detail".into()).into();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text_body(), Some("Internal Server Error".to_string()));
    }

    #[test]
    fn test_body_errors_keep_their_status() {
        let too_large: FunctionResponse = ShimError::PayloadTooLarge(16).into();
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);

        let unreadable: FunctionResponse = ShimError::BodyRead("reset".into()).into();
        assert_eq!(unreadable.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_env_display() {
        let err = ShimError::InvalidEnv {
            name: "FUNC_PORT",
            value: "abc".into(),
            reason: "invalid digit found in string".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"abc\" for FUNC_PORT: invalid digit found in string"
        );
    }
}
