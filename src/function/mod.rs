//! The function pipeline: events, handlers, isolated invocation and
//! classification of outcomes.

pub mod classify;
pub mod event;
pub mod handler;
pub mod invoker;

pub use classify::{classify, merge_records, CallSummary, TIMEOUT_MESSAGE};
pub use event::{Event, EventBuilder, EventData};
pub use handler::{FunctionContext, Handler, HandlerProvider, ModuleProvider};
pub use invoker::{InvocationOutcome, Invoker, ProcessInvoker, DEFAULT_MAX_OUTPUT};
