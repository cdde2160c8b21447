//! HTTP Server for scriptgate
//!
//! HTTP/1.1 via hyper: one tokio task per accepted connection, every request
//! handed to the [`GatewayRouter`].
//!
//! # Example
//!
//! ```no_run
//! use scriptgate_server::{Gateway, GatewayConfig, HttpServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Arc::new(Gateway::new(GatewayConfig::new()).await.unwrap());
//!     let server = HttpServer::new(gateway);
//!     server.run("127.0.0.1:8080".parse().unwrap()).await.unwrap();
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use scriptgate_common::protocol::{Result, ScriptgateError};
use scriptgate_metrics::MetricsCollector;

use crate::gateway::Gateway;
use crate::http_router::GatewayRouter;

pub struct HttpServer {
    router: Arc<GatewayRouter>,
    metrics: Arc<dyn MetricsCollector>,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let metrics = gateway.metrics().clone();
        Self {
            router: Arc::new(GatewayRouter::new(gateway)),
            metrics,
        }
    }

    /// Binds `addr` and serves until the task is dropped.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ScriptgateError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| ScriptgateError::Transport(format!("Failed to get local address: {}", e)))?;
        tracing::info!("HTTP server listening on {}", local);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let router = self.router.clone();
            let metrics = self.metrics.clone();

            tokio::task::spawn(async move {
                metrics.connection_opened();
                let service = service_fn(move |req| {
                    let router = router.clone();
                    async move { Ok::<_, Infallible>(router.handle(req, Some(peer)).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::error!(%peer, "Error serving connection: {}", err);
                }
                metrics.connection_closed();
            });
        }
    }
}
