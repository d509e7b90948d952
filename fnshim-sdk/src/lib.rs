//! Wire protocol spoken between the fnshim server and its worker processes.
//!
//! For every invocation the server spawns one worker, writes a single JSON
//! [`Invocation`] to the worker's stdin and closes it. The worker answers with
//! exactly one JSON [`WorkerMessage`] on stdout:
//!
//! ```text
//! {"return": <any JSON value>}
//! {"raise": "<error description>"}
//! ```
//!
//! The event's `data` is tagged the same way: `{"json": <value>}` for a body
//! the server parsed as JSON, `{"raw": "<base64>"}` for any other body, so
//! binary payloads reach the handler byte for byte.
//!
//! Stdout is reserved for that message. Handler logging belongs on stderr,
//! which the server passes through to its own log stream.
//!
//! Rust handlers don't need to deal with any of this by hand:
//!
//! ```rust,no_run
//! use fnshim_sdk::{serve, Context, Event};
//! use serde_json::{json, Value};
//!
//! fn hello(event: Event, _ctx: Context) -> Result<Value, String> {
//!     Ok(json!({ "hello": event.data.as_json() }))
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     serve(hello)
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;

/// Serialized copy of the inbound HTTP request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    /// Lower-cased header names; repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Extensions {
    pub request: RequestRecord,
}

/// Body of an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Data {
    /// Parsed body of an `application/json` request.
    Json(Value),
    /// Any other body, unparsed. Base64 on the wire.
    Raw(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Data {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(value) => Some(value),
            Data::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Json(_) => None,
            Data::Raw(bytes) => Some(bytes),
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::Json(Value::Null)
    }
}

mod base64_bytes {
    use super::{Deserialize, Deserializer, Serializer};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// The event handed to a handler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub data: Data,
    #[serde(rename = "event-id")]
    pub event_id: Option<String>,
    #[serde(rename = "event-type")]
    pub event_type: Option<String>,
    #[serde(rename = "event-time")]
    pub event_time: Option<String>,
    #[serde(rename = "event-namespace")]
    pub event_namespace: Option<String>,
    pub extensions: Extensions,
}

/// Function metadata fixed at server startup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Context {
    #[serde(rename = "function-name")]
    pub function_name: String,
    /// Timeout in seconds.
    pub timeout: f64,
    pub runtime: Option<String>,
    #[serde(rename = "memory-limit")]
    pub memory_limit: Option<String>,
}

/// What the server writes to a worker's stdin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Invocation {
    pub event: Event,
    pub context: Context,
}

/// What a worker writes to its stdout, once.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMessage {
    /// The handler returned a value.
    Return(Value),
    /// The handler failed; carries the error description.
    Raise(String),
}

pub fn encode_invocation(invocation: &Invocation) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(invocation)
}

pub fn decode_invocation(bytes: &[u8]) -> Result<Invocation, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn encode_message(message: &WorkerMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}

/// Decode a worker's stdout.
///
/// Returns `Ok(None)` when the worker wrote nothing but whitespace.
pub fn decode_message(bytes: &[u8]) -> Result<Option<WorkerMessage>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(bytes).map(Some)
}

/// Run `handler` as a worker: read the invocation from stdin, call the
/// handler, and write its outcome to stdout.
///
/// Errors and panics inside the handler are reported as
/// [`WorkerMessage::Raise`]. The returned exit code is only a failure when
/// the message itself could not be delivered.
pub fn serve<F, E>(handler: F) -> ExitCode
where
    F: FnOnce(Event, Context) -> Result<Value, E>,
    E: fmt::Display,
{
    let message = run_handler(std::io::stdin(), handler);

    let bytes = match encode_message(&message) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("[fnshim-sdk] failed to encode handler result: {}", e);
            // A Raise with a plain string always encodes.
            match encode_message(&WorkerMessage::Raise(format!(
                "failed to encode handler result: {}",
                e
            ))) {
                Ok(bytes) => bytes,
                Err(_) => return ExitCode::FAILURE,
            }
        }
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&bytes).and_then(|_| stdout.flush()) {
        eprintln!("[fnshim-sdk] failed to write stdout: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run_handler<R, F, E>(mut input: R, handler: F) -> WorkerMessage
where
    R: Read,
    F: FnOnce(Event, Context) -> Result<Value, E>,
    E: fmt::Display,
{
    let mut buf = Vec::new();
    if let Err(e) = input.read_to_end(&mut buf) {
        return WorkerMessage::Raise(format!("failed to read invocation: {}", e));
    }

    let invocation = match decode_invocation(&buf) {
        Ok(invocation) => invocation,
        Err(e) => return WorkerMessage::Raise(format!("invalid invocation: {}", e)),
    };

    let Invocation { event, context } = invocation;
    match panic::catch_unwind(AssertUnwindSafe(move || handler(event, context))) {
        Ok(Ok(value)) => WorkerMessage::Return(value),
        Ok(Err(e)) => WorkerMessage::Raise(e.to_string()),
        Err(payload) => WorkerMessage::Raise(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation_bytes(data: Data) -> Vec<u8> {
        let invocation = Invocation {
            event: Event {
                data,
                event_id: Some("42".to_string()),
                ..Event::default()
            },
            context: Context {
                function_name: "hello.handler".to_string(),
                timeout: 180.0,
                ..Context::default()
            },
        };
        encode_invocation(&invocation).unwrap()
    }

    #[test]
    fn test_message_wire_format() {
        let ret = encode_message(&WorkerMessage::Return(json!({"result": 42}))).unwrap();
        assert_eq!(ret, br#"{"return":{"result":42}}"#);

        let raise = encode_message(&WorkerMessage::Raise("boom".to_string())).unwrap();
        assert_eq!(raise, br#"{"raise":"boom"}"#);
    }

    #[test]
    fn test_decode_empty_message() {
        assert_eq!(decode_message(b"").unwrap(), None);
        assert_eq!(decode_message(b" \n").unwrap(), None);
    }

    #[test]
    fn test_decode_malformed_message() {
        assert!(decode_message(b"hello").is_err());
        assert!(decode_message(br#"{"other": 1}"#).is_err());
    }

    #[test]
    fn test_event_field_names() {
        let value = serde_json::to_value(Event::default()).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["data", "event-id", "event-type", "event-time", "event-namespace", "extensions"] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert_eq!(obj["event-id"], Value::Null);
    }

    #[test]
    fn test_data_wire_format() {
        let json_data = serde_json::to_value(Data::Json(json!({"a": 1}))).unwrap();
        assert_eq!(json_data, json!({"json": {"a": 1}}));

        let raw = serde_json::to_value(Data::Raw(b"hi".to_vec())).unwrap();
        assert_eq!(raw, json!({"raw": "aGk="}));
    }

    #[test]
    fn test_binary_body_survives_the_wire() {
        let body = vec![0xff, 0xfe, 0x00, 0x80];
        let input = invocation_bytes(Data::Raw(body.clone()));
        let invocation = decode_invocation(&input).unwrap();
        assert_eq!(invocation.event.data.as_bytes(), Some(&body[..]));
        assert_eq!(invocation.event.data.as_json(), None);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let result: Result<Data, _> = serde_json::from_str(r#"{"raw": "not base64!"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_handler_returns_value() {
        let input = invocation_bytes(Data::Json(json!({"a": 1})));
        let message = run_handler(&input[..], |event, ctx| -> Result<Value, String> {
            Ok(json!({"data": event.data.as_json(), "id": event.event_id, "fn": ctx.function_name}))
        });
        assert_eq!(
            message,
            WorkerMessage::Return(json!({"data": {"a": 1}, "id": "42", "fn": "hello.handler"}))
        );
    }

    #[test]
    fn test_run_handler_error_is_raised() {
        let input = invocation_bytes(Data::default());
        let message = run_handler(&input[..], |_, _| -> Result<Value, String> {
            Err("bad things".to_string())
        });
        assert_eq!(message, WorkerMessage::Raise("bad things".to_string()));
    }

    #[test]
    fn test_run_handler_panic_is_raised() {
        let input = invocation_bytes(Data::default());
        let message = run_handler(&input[..], |_, _| -> Result<Value, String> {
            panic!("kaboom")
        });
        assert_eq!(
            message,
            WorkerMessage::Raise("handler panicked: kaboom".to_string())
        );
    }

    #[test]
    fn test_run_handler_invalid_invocation() {
        let message = run_handler(&b"not json"[..], |_, _| -> Result<Value, String> {
            Ok(Value::Null)
        });
        assert!(matches!(message, WorkerMessage::Raise(ref m) if m.starts_with("invalid invocation")));
    }
}
