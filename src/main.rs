//! fnshim server binary.
//!
//! Reads its configuration from the environment, resolves the function
//! module once, and serves it until the process is stopped.

use fnshim::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ShimConfig::from_env()?;
    if config.timeout <= 0.0 {
        tracing::warn!(
            "FUNC_TIMEOUT is {}; every invocation will time out immediately",
            config.timeout
        );
    }

    let handler = ModuleProvider::from_config(&config).resolve()?;

    tracing::info!("Starting fnshim for '{}'...", handler.name());

    let server = ShimServer::new(config, handler)?;
    server.run().await
}
