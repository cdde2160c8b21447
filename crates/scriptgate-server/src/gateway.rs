//! Gateway - the core of scriptgate
//!
//! Owns the handler registry, the global state and the dispatcher, and wires
//! in the collaborators (metrics, execution history, code archive, state
//! store). HTTP layers talk to the gateway; the gateway talks to the lane.
//!
//! # Example
//!
//! ```no_run
//! use scriptgate_server::{Gateway, GatewayConfig};
//!
//! # async fn run() -> scriptgate_common::Result<()> {
//! let config = GatewayConfig::new()
//!     .with_bootstrap("registerHandler('GET', '/hello', () => ({hello: 'world'}))");
//! let gateway = Gateway::new(config).await?;
//! assert_eq!(gateway.handlers().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use hyper::http::request::Parts;
use serde::Serialize;
use serde_json::Value;

use scriptgate_common::auth::AuthConfig;
use scriptgate_common::protocol::{
    generate_trace_id, unix_millis, ExecuteRequest, HandlerInfo, Result, ScriptgateError,
};
use scriptgate_metrics::{GatewayMetricsCollector, MetricsCollector, MetricsSnapshot, Outcome, ServerInfo};

use crate::bridge::ScriptRequest;
use crate::dispatcher::{Dispatcher, ExecutionResult, InvokeOutcome};
use crate::persistence::{
    CodeArchive, ExecutionKind, ExecutionLog, ExecutionRecord, MemoryCodeArchive,
    MemoryExecutionLog, StateStore,
};
use crate::registry::HandlerRegistry;
use crate::resource_limits::ResourceLimits;
use crate::state::GlobalState;

pub const DEFAULT_ADMIN_PREFIX: &str = "/_admin";

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub limits: ResourceLimits,
    /// Guards the admin surface only
    pub auth: AuthConfig,
    pub admin_prefix: String,
    /// Script evaluated on the lane before the gateway accepts requests
    pub bootstrap: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            auth: AuthConfig::disabled(),
            admin_prefix: DEFAULT_ADMIN_PREFIX.to_string(),
            bootstrap: None,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_admin_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.admin_prefix = prefix.into();
        self
    }

    pub fn with_bootstrap(mut self, code: impl Into<String>) -> Self {
        self.bootstrap = Some(code.into());
        self
    }

    /// Reads the bootstrap script from `path`.
    pub fn with_bootstrap_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let code = std::fs::read_to_string(path).map_err(|e| {
            ScriptgateError::InvalidRequest(format!(
                "Failed to load bootstrap script {}: {}",
                path.display(),
                e
            ))
        })?;
        tracing::info!(path = %path.display(), "Bootstrap script loaded");
        Ok(self.with_bootstrap(code))
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate().map_err(ScriptgateError::InvalidRequest)?;

        let prefix = &self.admin_prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            return Err(ScriptgateError::InvalidRequest(format!(
                "admin prefix must look like '/_admin', got '{}'",
                prefix
            )));
        }
        Ok(())
    }
}

/// External services the gateway reports to.
pub struct Collaborators {
    pub metrics: Arc<dyn MetricsCollector>,
    pub execution_log: Arc<dyn ExecutionLog>,
    pub code_archive: Arc<dyn CodeArchive>,
    /// Without a store, global state lives only in memory
    pub state_store: Option<Arc<dyn StateStore>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            metrics: Arc::new(GatewayMetricsCollector::new()),
            execution_log: Arc::new(MemoryExecutionLog::new()),
            code_archive: Arc::new(MemoryCodeArchive::new()),
            state_store: None,
        }
    }
}

/// Body of `GET /_admin/status`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub server: ServerInfo,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub execution_timeout_ms: u64,
    /// Times a wedged execution lane has been replaced
    pub lane_restarts: u64,
    pub handler_count: usize,
    pub state_keys: usize,
    pub metrics: MetricsSnapshot,
}

pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<HandlerRegistry>,
    state: Arc<GlobalState>,
    dispatcher: Dispatcher,
    metrics: Arc<dyn MetricsCollector>,
    execution_log: Arc<dyn ExecutionLog>,
    code_archive: Arc<dyn CodeArchive>,
}

impl Gateway {
    /// Starts a gateway with in-memory collaborators.
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default()).await
    }

    pub async fn with_collaborators(config: GatewayConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let state = match collaborators.state_store {
            Some(store) => {
                // The writer finishes on its own once the state is dropped
                let (state, _writer) = GlobalState::with_store(store)?;
                state
            }
            None => GlobalState::new(),
        };
        let state = Arc::new(state);
        let registry = Arc::new(HandlerRegistry::new());

        let dispatcher = Dispatcher::start(
            &config.limits,
            registry.clone(),
            state.clone(),
            config.bootstrap.clone(),
        )
        .await?;

        tracing::info!(
            handlers = registry.len(),
            timeout_ms = config.limits.execution_timeout.as_millis() as u64,
            queue_capacity = config.limits.queue_capacity,
            auth = %config.auth,
            "Gateway ready"
        );

        Ok(Self {
            config,
            registry,
            state,
            dispatcher,
            metrics: collaborators.metrics,
            execution_log: collaborators.execution_log,
            code_archive: collaborators.code_archive,
        })
    }

    /// Routes a script-defined request to its handler and waits for the outcome.
    ///
    /// Unmatched requests fail with `NotFound`, or `MethodNotAllowed` when the
    /// path is served under other methods; no script runs for either. A
    /// handler that threw still yields an outcome, with `result.error` set.
    pub async fn dispatch(
        &self,
        parts: &Parts,
        body: &[u8],
        peer: Option<SocketAddr>,
    ) -> Result<InvokeOutcome> {
        let start = Instant::now();
        let method = parts.method.as_str();
        let path = parts.uri.path();

        let Some(route) = self.registry.lookup(method, path) else {
            self.metrics.record_unmatched();
            let allowed = self.registry.allowed_methods(path);
            tracing::debug!(%method, %path, "No handler matched");
            return Err(if allowed.is_empty() {
                ScriptgateError::NotFound {
                    method: method.to_string(),
                    path: path.to_string(),
                }
            } else {
                ScriptgateError::MethodNotAllowed {
                    method: method.to_string(),
                    path: path.to_string(),
                    allowed,
                }
            });
        };

        let trace_id = generate_trace_id();
        let route_key = route.descriptor.route_key();
        let request = ScriptRequest::from_parts(parts, body, route.params, peer, trace_id);
        let started_at_ms = unix_millis();

        let result = self.dispatcher.invoke(&route.descriptor, request).await;

        let outcome = match &result {
            Ok(invoked) if invoked.result.is_success() => Outcome::Success,
            Err(ScriptgateError::Timeout(_)) => Outcome::Timeout,
            _ => Outcome::Failure,
        };
        self.metrics.record_call(&route_key, start, outcome);

        let (error, logs) = match &result {
            Ok(invoked) => (invoked.result.error.clone(), invoked.result.logs.clone()),
            Err(e) => (Some(e.to_string()), Vec::new()),
        };
        self.record_execution(ExecutionRecord {
            id: trace_id,
            kind: ExecutionKind::Handler,
            label: route_key,
            started_at_ms,
            elapsed_ms: start.elapsed().as_millis() as u64,
            success: error.is_none(),
            error,
            logs,
        });

        result
    }

    /// Runs ad-hoc code on the lane, archiving it first.
    pub async fn execute_script(&self, request: ExecuteRequest) -> Result<ExecutionResult> {
        let start = Instant::now();
        let started_at_ms = unix_millis();
        let label = request.label().to_string();

        if let Err(e) = self.code_archive.archive(&label, started_at_ms, &request.code) {
            tracing::warn!(%label, "Failed to archive script: {}", e);
        }

        let trace_id = generate_trace_id();
        let result = self.dispatcher.execute(request.code, label.clone(), trace_id).await;

        let (error, logs) = match &result {
            Ok(executed) => (executed.error.clone(), executed.logs.clone()),
            Err(e) => (Some(e.to_string()), Vec::new()),
        };
        self.record_execution(ExecutionRecord {
            id: trace_id,
            kind: ExecutionKind::Raw,
            label,
            started_at_ms,
            elapsed_ms: start.elapsed().as_millis() as u64,
            success: error.is_none(),
            error,
            logs,
        });

        result
    }

    fn record_execution(&self, record: ExecutionRecord) {
        if let Err(e) = self.execution_log.append(record) {
            tracing::warn!("Failed to append execution record: {}", e);
        }
    }

    /// Registered handlers in registration order.
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        self.registry.list().iter().map(|d| d.info()).collect()
    }

    /// Deletes the handler for exactly `(method, pattern)` and releases its callable.
    pub fn remove_handler(&self, method: &str, pattern: &str) -> bool {
        match self.registry.delete(method, pattern) {
            Some(descriptor) => {
                tracing::info!(route = %descriptor.route_key(), "Handler removed");
                self.dispatcher.release(descriptor.handler);
                true
            }
            None => false,
        }
    }

    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.state.snapshot()
    }

    pub fn executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.execution_log.recent(limit)
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            server: self.metrics.server_info(),
            queue_depth: self.dispatcher.queue_depth(),
            queue_capacity: self.config.limits.queue_capacity,
            execution_timeout_ms: self.config.limits.execution_timeout.as_millis() as u64,
            lane_restarts: self.dispatcher.restarts(),
            handler_count: self.registry.len(),
            state_keys: self.state.len(),
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<GlobalState> {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    /// Stops the lane once the jobs already queued have run.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStateStore;
    use hyper::Request;
    use serde_json::json;
    use std::io::Write;

    fn parts(method: &str, uri: &str) -> Parts {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    async fn gateway(bootstrap: &str) -> Gateway {
        Gateway::new(GatewayConfig::new().with_bootstrap(bootstrap))
            .await
            .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(GatewayConfig::new().validate().is_ok());
        assert!(GatewayConfig::new().with_admin_prefix("admin").validate().is_err());
        assert!(GatewayConfig::new().with_admin_prefix("/").validate().is_err());
        assert!(GatewayConfig::new().with_admin_prefix("/ops/").validate().is_err());

        let limits = ResourceLimits::new().with_queue_capacity(0);
        assert!(GatewayConfig::new().with_limits(limits).validate().is_err());
    }

    #[test]
    fn test_bootstrap_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "registerHandler('GET', '/f', () => 1);").unwrap();
        let config = GatewayConfig::new().with_bootstrap_file(file.path()).unwrap();
        assert_eq!(config.bootstrap.as_deref(), Some("registerHandler('GET', '/f', () => 1);"));

        let err = GatewayConfig::new().with_bootstrap_file("/definitely/not/here.js").unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_dispatch_records_metrics_and_history() {
        let gateway = gateway("registerHandler('GET', '/users/:id', (req) => ({id: req.params.id}))").await;

        let outcome = gateway.dispatch(&parts("GET", "/users/42"), b"", None).await.unwrap();
        assert_eq!(outcome.response.body, br#"{"id":"42"}"#);

        let snapshot = gateway.metrics().snapshot();
        assert_eq!(snapshot.routes["GET /users/:id"].success_count, 1);

        let records = gateway.executions(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "GET /users/:id");
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_unmatched_requests() {
        let gateway = gateway("registerHandler('POST', '/items', () => 1)").await;

        let err = gateway.dispatch(&parts("GET", "/nothing"), b"", None).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = gateway.dispatch(&parts("GET", "/items"), b"", None).await.unwrap_err();
        assert_eq!(err.status_code(), 405);

        assert_eq!(gateway.metrics().snapshot().unmatched_requests, 2);
        assert!(gateway.executions(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_script_archives_and_records() {
        let archive = Arc::new(MemoryCodeArchive::new());
        let collaborators = Collaborators {
            code_archive: archive.clone(),
            ..Collaborators::default()
        };
        let gateway = Gateway::with_collaborators(GatewayConfig::new(), collaborators)
            .await
            .unwrap();

        let result = gateway
            .execute_script(ExecuteRequest::new("throw new Error('nope')").with_name("failing"))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Error: nope"));

        let entries = archive.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "failing");

        let records = gateway.executions(1).unwrap();
        assert_eq!(records[0].kind, ExecutionKind::Raw);
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn test_remove_handler() {
        let gateway = gateway("registerHandler('GET', '/x', () => 1)").await;
        assert!(gateway.remove_handler("get", "/x"));
        assert!(!gateway.remove_handler("GET", "/x"));
        assert!(gateway.handlers().is_empty());

        let err = gateway.dispatch(&parts("GET", "/x"), b"", None).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_state_store_is_loaded() {
        let store = Arc::new(MemoryStateStore::with_values(HashMap::from([(
            "greeting".to_string(),
            json!("hi"),
        )])));
        let collaborators = Collaborators {
            state_store: Some(store),
            ..Collaborators::default()
        };
        let config = GatewayConfig::new().with_bootstrap("state.set('seen', state.get('greeting') + '!')");
        let gateway = Gateway::with_collaborators(config, collaborators).await.unwrap();

        assert_eq!(gateway.state_snapshot()["seen"], json!("hi!"));
    }

    #[tokio::test]
    async fn test_status() {
        let gateway = gateway("registerHandler('GET', '/a', () => 1); state.set('k', 1)").await;
        let status = gateway.status();
        assert_eq!(status.handler_count, 1);
        assert_eq!(status.state_keys, 1);
        assert_eq!(status.server.name, "scriptgate");
        assert_eq!(status.queue_capacity, ResourceLimits::default().queue_capacity);
    }
}
