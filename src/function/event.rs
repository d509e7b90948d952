//! Event construction from inbound requests.

use crate::error::ShimError;
use crate::http::FunctionRequest;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

/// Body of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// Body of an `application/json` request.
    Json(Value),
    /// Any other body, unparsed.
    Raw(Bytes),
}

impl EventData {
    /// Lossless copy for a worker process.
    pub fn to_wire(&self) -> fnshim_sdk::Data {
        match self {
            EventData::Json(value) => fnshim_sdk::Data::Json(value.clone()),
            EventData::Raw(bytes) => fnshim_sdk::Data::Raw(bytes.to_vec()),
        }
    }

    /// JSON rendering for response bodies. Raw bodies become strings,
    /// lossily decoded as UTF-8.
    pub fn into_value(self) -> Value {
        match self {
            EventData::Json(value) => value,
            EventData::Raw(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

/// Extra request material attached to an event.
#[derive(Debug, Clone)]
pub struct Extensions {
    /// The inbound request. Shared, never copied, until the event is
    /// serialized for a worker.
    pub request: Arc<FunctionRequest>,
}

/// The per-request event passed to a handler.
#[derive(Debug, Clone)]
pub struct Event {
    pub data: EventData,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub event_time: Option<String>,
    pub event_namespace: Option<String>,
    pub extensions: Extensions,
}

impl Event {
    /// Serializable copy of the event for a worker process.
    pub fn to_wire(&self) -> fnshim_sdk::Event {
        fnshim_sdk::Event {
            data: self.data.to_wire(),
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            event_time: self.event_time.clone(),
            event_namespace: self.event_namespace.clone(),
            extensions: fnshim_sdk::Extensions {
                request: self.extensions.request.to_record(),
            },
        }
    }
}

/// Builds events from requests.
pub struct EventBuilder;

impl EventBuilder {
    /// Content type whose bodies are parsed as JSON. Matched exactly.
    pub const JSON_CONTENT_TYPE: &'static str = "application/json";

    /// Build the event for `request`.
    ///
    /// Fails only when the request declares a JSON body that does not parse.
    pub fn build(request: Arc<FunctionRequest>) -> Result<Event, ShimError> {
        let data = if request.content_type() == Some(Self::JSON_CONTENT_TYPE) {
            EventData::Json(serde_json::from_slice(&request.body).map_err(ShimError::MalformedBody)?)
        } else {
            EventData::Raw(request.body.clone())
        };

        let header = |name: &str| request.get_header(name).map(str::to_string);

        Ok(Event {
            data,
            event_id: header("event-id"),
            event_type: header("event-type"),
            event_time: header("event-time"),
            event_namespace: header("event-namespace"),
            extensions: Extensions {
                request: request.clone(),
            },
        })
    }
}
