//! HTTP records exchanged between the server loop and the function pipeline.

mod request;
mod response;

pub use request::FunctionRequest;
pub use response::FunctionResponse;
pub use hyper::{HeaderMap, Method, StatusCode};
