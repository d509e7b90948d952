//! The shim runtime: configuration, metrics, the request pipeline and the
//! HTTP server around it.

mod config;
mod metrics;
mod pipeline;
mod server;

pub use config::ShimConfig;
pub use metrics::{Metrics, FUNCTION_METHODS};
pub use pipeline::RequestHandler;
pub use server::ShimServer;
