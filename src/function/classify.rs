//! Mapping of invocation outcomes to HTTP responses.

use crate::error::ShimError;
use crate::function::invoker::InvocationOutcome;
use crate::http::{FunctionRequest, FunctionResponse};
use hyper::StatusCode;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Body of the 408 response.
pub const TIMEOUT_MESSAGE: &str = "Timeout while processing the function";

/// Key that marks a returned mapping as a handler-reported error.
pub const ERROR_KEY: &str = "error";

/// The request facts merged into handler-reported errors.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSummary {
    pub headers: BTreeMap<String, String>,
    pub method: String,
    pub body: Value,
}

impl CallSummary {
    /// Summarize `request`; `body` is the event data the handler saw.
    pub fn new(request: &FunctionRequest, body: Value) -> Self {
        Self {
            headers: request.header_map(),
            method: request.method.to_string(),
            body,
        }
    }

    fn into_map(self) -> Map<String, Value> {
        let headers = self
            .headers
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();

        let mut map = Map::new();
        map.insert("headers".to_string(), Value::Object(headers));
        map.insert("method".to_string(), Value::String(self.method));
        map.insert("body".to_string(), self.body);
        map
    }
}

/// Merge two records. Keys present in `overlay` replace those in `base`;
/// every other `base` key is kept.
pub fn merge_records(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

/// Turn an invocation outcome into a response.
///
/// Faults are returned as `Err` so the caller's failure accounting sees
/// them; everything else is a response.
pub fn classify(outcome: InvocationOutcome, call: CallSummary) -> Result<FunctionResponse, ShimError> {
    match outcome {
        InvocationOutcome::TimedOut => Ok(FunctionResponse::error(
            StatusCode::REQUEST_TIMEOUT,
            TIMEOUT_MESSAGE,
        )),
        InvocationOutcome::Fault(description) => Err(ShimError::HandlerFault(description)),
        InvocationOutcome::Success(Value::Object(map)) if map.contains_key(ERROR_KEY) => {
            let merged = merge_records(call.into_map(), map);
            FunctionResponse::json(&merged)
                .map(|response| response.with_status(StatusCode::BAD_REQUEST))
                .map_err(ShimError::Encode)
        }
        InvocationOutcome::Success(value) => {
            FunctionResponse::json(&value).map_err(ShimError::Encode)
        }
    }
}
