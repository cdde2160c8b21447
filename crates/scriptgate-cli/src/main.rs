//! # Scriptgate CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve the routes registered by a bootstrap script
//! scriptgate serve -s routes.js -b 0.0.0.0:8080
//!
//! # Start empty, protect the admin surface and configure over HTTP
//! scriptgate serve -b 127.0.0.1:8080 --api-key secret
//! curl -H 'X-API-Key: secret' --data "registerHandler('GET', '/hi', () => 'hi')" \
//!     http://127.0.0.1:8080/_admin/execute
//! ```

use std::sync::Arc;

use anyhow::Result;

use scriptgate_cli::{Cli, Commands, ServeArgs};
use scriptgate_server::{Gateway, HttpServer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, RUST_LOG overrides
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let addr = args.bind_addr()?;
    let config = args.gateway_config()?;

    tracing::info!(
        script = args.script.as_deref().unwrap_or("<none>"),
        timeout_ms = args.timeout_ms,
        queue_capacity = args.queue_capacity,
        "Starting scriptgate"
    );
    if config.auth.requires_auth() {
        tracing::info!("API key authentication enabled for {}", config.admin_prefix);
    }

    let gateway = Arc::new(Gateway::new(config).await?);
    let server = HttpServer::new(gateway.clone());

    let result = tokio::select! {
        result = server.run(addr) => result.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    gateway.shutdown().await;
    tracing::info!("Gateway stopped");
    result
}
