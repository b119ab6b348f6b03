use std::net::SocketAddr;
use tracing::{error, info};

use db_agent_backend::api;
use db_agent_backend::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so RUST_LOG from .env applies to logging
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting server on {}", config.server_address());
    if config.llm.api_key.is_none() {
        info!("No LLM API key configured; query generation will fail until one is set");
    }

    let app = api::routes::create_router_with_state(&config).map_err(|e| {
        error!("Failed to initialize services: {}", e);
        e
    })?;

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
