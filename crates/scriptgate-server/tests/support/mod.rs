//! Shared harness for the HTTP integration tests.
//!
//! Each [`TestServer`] owns a gateway bound to an ephemeral port on
//! localhost, so tests run in parallel without sharing state.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use scriptgate_common::auth::AuthConfig;
use scriptgate_server::{Gateway, GatewayConfig, HttpServer, ResourceLimits};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub client: reqwest::Client,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(bootstrap: &str) -> Self {
        Self::with_config(GatewayConfig::new().with_bootstrap(bootstrap)).await
    }

    pub async fn with_timeout(bootstrap: &str, timeout: Duration) -> Self {
        let limits = ResourceLimits::new().with_execution_timeout(timeout);
        Self::with_config(GatewayConfig::new().with_limits(limits).with_bootstrap(bootstrap)).await
    }

    pub async fn with_api_key(bootstrap: &str, key: &str) -> Self {
        let config = GatewayConfig::new()
            .with_auth(AuthConfig::with_api_key(key))
            .with_bootstrap(bootstrap);
        Self::with_config(config).await
    }

    pub async fn with_config(config: GatewayConfig) -> Self {
        let gateway = Arc::new(Gateway::new(config).await.expect("gateway should start"));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let server = HttpServer::new(gateway.clone());
        let task = tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        Self {
            addr,
            gateway,
            client: reqwest::Client::new(),
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.expect("request should complete")
    }

    /// Evaluates `code` through the admin surface and returns the response body.
    pub async fn execute(&self, code: &str) -> serde_json::Value {
        self.client
            .post(self.url("/_admin/execute"))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .expect("execute should complete")
            .json()
            .await
            .expect("execute body should be json")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
