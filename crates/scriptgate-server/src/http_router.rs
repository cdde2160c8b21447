//! HTTP Router for scriptgate
//!
//! Splits incoming requests between two surfaces:
//!
//! - **Admin**: everything under the admin prefix (`/_admin` by default),
//!   optionally guarded by `X-API-Key`. `GET <prefix>/health` is always open.
//! - **Scripts**: every other request is resolved against the handler
//!   registry and run on the execution lane.
//!
//! | Route | Action |
//! |-------|--------|
//! | `POST /_admin/execute` | evaluate raw code |
//! | `GET /_admin/handlers` | list handlers |
//! | `DELETE /_admin/handlers?method=M&path=P` | remove a handler |
//! | `GET /_admin/state` | global state snapshot |
//! | `GET /_admin/executions?limit=N` | recent executions, newest first |
//! | `GET /_admin/status` | server info, queue depth, metrics |
//! | `GET /_admin/health` | liveness |

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::{Method, StatusCode};
use serde_json::Value;

use scriptgate_common::auth::API_KEY_HEADER;
use scriptgate_common::protocol::{
    DeleteHandlerResponse, ExecuteRequest, ExecuteResponse, HealthResponse, Result,
    ScriptgateError,
};
use scriptgate_common::transport::{HttpTransport, HyperRequest, HyperResponse};

use crate::bridge::parse_query;
use crate::gateway::Gateway;

const DEFAULT_EXECUTIONS_LIMIT: usize = 50;
const MAX_EXECUTIONS_LIMIT: usize = 1000;

/// Admin routes and the methods they accept.
const ADMIN_ROUTES: &[(&str, &[&str])] = &[
    ("/execute", &["POST"]),
    ("/handlers", &["GET", "DELETE"]),
    ("/state", &["GET"]),
    ("/executions", &["GET"]),
    ("/status", &["GET"]),
    ("/health", &["GET"]),
];

pub struct GatewayRouter {
    gateway: Arc<Gateway>,
}

impl GatewayRouter {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Handles one HTTP request. Every failure is rendered as a JSON error body.
    pub async fn handle(&self, req: HyperRequest, peer: Option<SocketAddr>) -> HyperResponse {
        let (parts, body) = req.into_parts();

        let body = match self.read_body(body).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(path = %parts.uri.path(), "Rejected request body: {}", e);
                return HttpTransport::error_response(&e);
            }
        };

        let prefix = self.gateway.config().admin_prefix.as_str();
        if let Some(route) = admin_route(parts.uri.path(), prefix) {
            return match self.handle_admin(&parts, route, &body).await {
                Ok(response) => response,
                Err(e) => HttpTransport::error_response(&e),
            };
        }

        self.handle_script(&parts, &body, peer).await
    }

    async fn read_body(&self, body: Incoming) -> Result<Bytes> {
        let limit = self.gateway.config().limits.max_body_bytes;
        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() => Err(
                ScriptgateError::InvalidRequest(format!("request body exceeds {} bytes", limit)),
            ),
            Err(e) => Err(ScriptgateError::Transport(format!(
                "Failed to read request body: {}",
                e
            ))),
        }
    }

    async fn handle_script(&self, parts: &Parts, body: &[u8], peer: Option<SocketAddr>) -> HyperResponse {
        match self.gateway.dispatch(parts, body, peer).await {
            Ok(outcome) => match outcome.result.script_error() {
                Some(err) => {
                    tracing::debug!(path = %parts.uri.path(), "Handler failed: {}", err);
                    HttpTransport::error_response_with_logs(&err, outcome.result.logs)
                }
                None => outcome.response.into_hyper(),
            },
            Err(e) => HttpTransport::error_response(&e),
        }
    }

    async fn handle_admin(&self, parts: &Parts, route: &str, body: &[u8]) -> Result<HyperResponse> {
        let method = &parts.method;

        if !(route == "/health" && *method == Method::GET) {
            let key = parts
                .headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok());
            self.gateway.config().auth.authorize(key)?;
        }

        match (method, route) {
            (&Method::POST, "/execute") => self.execute(parts, body).await,
            (&Method::GET, "/handlers") => Ok(HttpTransport::json_response(
                StatusCode::OK,
                &self.gateway.handlers(),
            )),
            (&Method::DELETE, "/handlers") => self.delete_handler(parts),
            (&Method::GET, "/state") => {
                let state: BTreeMap<String, Value> =
                    self.gateway.state_snapshot().into_iter().collect();
                Ok(HttpTransport::json_response(StatusCode::OK, &state))
            }
            (&Method::GET, "/executions") => {
                let limit = executions_limit(parts.uri.query())?;
                let records = self.gateway.executions(limit)?;
                Ok(HttpTransport::json_response(StatusCode::OK, &records))
            }
            (&Method::GET, "/status") => Ok(HttpTransport::json_response(
                StatusCode::OK,
                &self.gateway.status(),
            )),
            (&Method::GET, "/health") => Ok(HttpTransport::json_response(
                StatusCode::OK,
                &HealthResponse::healthy(),
            )),
            _ => Err(admin_miss(method, route, parts.uri.path())),
        }
    }

    async fn execute(&self, parts: &Parts, body: &[u8]) -> Result<HyperResponse> {
        let content_type = parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let request = ExecuteRequest::from_body(body, content_type)?;
        let result = self.gateway.execute_script(request).await?;

        let status = if result.is_success() {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let response = ExecuteResponse {
            result: result.value.unwrap_or(Value::Null),
            logs: result.logs,
            error: result.error,
            duration_ms: result.elapsed.as_millis() as u64,
        };
        Ok(HttpTransport::json_response(status, &response))
    }

    fn delete_handler(&self, parts: &Parts) -> Result<HyperResponse> {
        let query = parse_query(parts.uri.query());
        let field = |name: &str| {
            query
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    ScriptgateError::InvalidRequest(format!("missing '{}' query parameter", name))
                })
        };
        let method = field("method")?;
        let path = field("path")?;

        if !self.gateway.remove_handler(&method, &path) {
            return Err(ScriptgateError::NotFound { method, path });
        }

        Ok(HttpTransport::json_response(
            StatusCode::OK,
            &DeleteHandlerResponse {
                deleted: true,
                method: method.to_ascii_uppercase(),
                path,
            },
        ))
    }
}

/// The part of `path` after the admin prefix, or `None` for script paths.
fn admin_route<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let trimmed = rest.trim_end_matches('/');
    Some(if trimmed.is_empty() { "/" } else { trimmed })
}

fn admin_miss(method: &Method, route: &str, path: &str) -> ScriptgateError {
    match ADMIN_ROUTES.iter().find(|(known, _)| *known == route) {
        Some((_, methods)) => ScriptgateError::MethodNotAllowed {
            method: method.to_string(),
            path: path.to_string(),
            allowed: methods.iter().map(|m| m.to_string()).collect(),
        },
        None => ScriptgateError::NotFound {
            method: method.to_string(),
            path: path.to_string(),
        },
    }
}

fn executions_limit(query: Option<&str>) -> Result<usize> {
    let query = parse_query(query);
    match query.get("limit").and_then(|v| v.as_str()) {
        None => Ok(DEFAULT_EXECUTIONS_LIMIT),
        Some(raw) => raw
            .parse::<usize>()
            .map(|limit| limit.min(MAX_EXECUTIONS_LIMIT))
            .map_err(|_| ScriptgateError::InvalidRequest(format!("invalid limit '{}'", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_route() {
        assert_eq!(admin_route("/_admin/handlers", "/_admin"), Some("/handlers"));
        assert_eq!(admin_route("/_admin/handlers/", "/_admin"), Some("/handlers"));
        assert_eq!(admin_route("/_admin", "/_admin"), Some("/"));
        assert_eq!(admin_route("/_administrator", "/_admin"), None);
        assert_eq!(admin_route("/users", "/_admin"), None);
    }

    #[test]
    fn test_admin_miss() {
        let err = admin_miss(&Method::PUT, "/state", "/_admin/state");
        assert_eq!(err.status_code(), 405);

        let err = admin_miss(&Method::GET, "/nope", "/_admin/nope");
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_executions_limit() {
        assert_eq!(executions_limit(None).unwrap(), DEFAULT_EXECUTIONS_LIMIT);
        assert_eq!(executions_limit(Some("limit=3")).unwrap(), 3);
        assert_eq!(executions_limit(Some("limit=999999")).unwrap(), MAX_EXECUTIONS_LIMIT);
        assert!(executions_limit(Some("limit=abc")).is_err());
    }
}
