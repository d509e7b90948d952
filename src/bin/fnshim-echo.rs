//! Reference handler for fnshim.
//!
//! Echoes the event back, with a few switches read from JSON object data:
//!
//! - `{"sleep": <seconds>}` sleeps before answering
//! - `{"raise": "<message>"}` fails with that message
//! - `{"error": ...}` returns the data unchanged (a handler-reported error)
//! - `{"abort": true}` aborts the process without answering
//!
//! Raw bodies come back as an array of byte values under `raw`.

use fnshim_sdk::{serve, Context, Data, Event};
use serde_json::{json, Value};
use std::process::ExitCode;
use std::time::Duration;

fn echo(event: Event, ctx: Context) -> Result<Value, String> {
    if let Data::Json(Value::Object(obj)) = &event.data {
        if let Some(secs) = obj.get("sleep").and_then(Value::as_f64) {
            if let Ok(duration) = Duration::try_from_secs_f64(secs) {
                std::thread::sleep(duration);
            }
        }
        if let Some(message) = obj.get("raise").and_then(Value::as_str) {
            return Err(message.to_string());
        }
        if obj.get("abort").and_then(Value::as_bool) == Some(true) {
            std::process::abort();
        }
        if obj.contains_key("error") {
            return Ok(Value::Object(obj.clone()));
        }
    }

    eprintln!("[fnshim-echo] handling {} {}", event.extensions.request.method, event.extensions.request.url);

    Ok(json!({
        "data": event.data.as_json(),
        "raw": event.data.as_bytes(),
        "event-id": event.event_id,
        "event-type": event.event_type,
        "event-time": event.event_time,
        "event-namespace": event.event_namespace,
        "method": event.extensions.request.method,
        "function-name": ctx.function_name,
        "timeout": ctx.timeout,
        "runtime": ctx.runtime,
        "memory-limit": ctx.memory_limit,
    }))
}

fn main() -> ExitCode {
    serve(echo)
}
