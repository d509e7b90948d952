//! # fnshim - single-function runtime shim
//!
//! fnshim sits between a platform's router and one piece of user code. Every
//! inbound HTTP request becomes an event, the event is handed to the user's
//! handler in a fresh worker process under a hard timeout, and the handler's
//! result comes back as the HTTP response.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP request
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   ┌──────────────┐
//! │ EventBuilder │──▶│ ProcessInvoker│──▶│ classify()     │──▶│ HTTP response│
//! └──────────────┘   └──────┬───────┘   └────────────────┘   └──────────────┘
//!                           │ stdin: {"event", "context"}
//!                           ▼
//!                   ┌────────────────┐
//!                   │ worker process │  stdout: {"return": ..} | {"raise": ..}
//!                   └────────────────┘
//! ```
//!
//! The whole pipeline runs inside [`runtime::Metrics::observe`], which
//! records `function_calls_total`, `function_duration_seconds` and
//! `function_failures_total` per HTTP method.
//!
//! ## Responses
//!
//! | Outcome | Status | Body |
//! |---|---|---|
//! | handler returned a value | 200 | the value as JSON |
//! | handler returned a map with an `error` key | 400 | the map merged with `headers`, `method`, `body` |
//! | handler did not finish in time | 408 | `Timeout while processing the function` |
//! | handler raised, crashed, or wrote too much output | 500 | generic |
//! | body declared as JSON does not parse | 500 | generic |
//! | body larger than `FUNC_MAX_BODY_SIZE` | 413 | generic |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fnshim::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ShimConfig::from_env()?;
//!     let handler = ModuleProvider::from_config(&config).resolve()?;
//!     ShimServer::new(config, handler)?.run().await
//! }
//! ```

pub mod error;
pub mod function;
pub mod http;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::error::ShimError;
    pub use crate::function::{
        FunctionContext, Handler, HandlerProvider, InvocationOutcome, Invoker, ModuleProvider,
        ProcessInvoker,
    };
    pub use crate::http::{FunctionRequest, FunctionResponse, Method, StatusCode};
    pub use crate::runtime::{Metrics, ShimConfig, ShimServer};
}

// Re-export for convenience
pub use error::ShimError;
pub use function::{FunctionContext, Handler, HandlerProvider, ModuleProvider};
pub use http::{FunctionRequest, FunctionResponse};
pub use runtime::{ShimConfig, ShimServer};
