//! Admin API wire types
//!
//! Strongly-typed request and response bodies for the `/_admin` surface:
//! raw-code execution, handler introspection, health, and error bodies shared
//! by every failing response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Result, ScriptgateError};

// ============================================================================
// Error Body
// ============================================================================

/// JSON body written for every error response.
///
/// ```
/// use scriptgate_common::protocol::{ErrorBody, ScriptgateError};
///
/// let body = ErrorBody::from_error(&ScriptgateError::Timeout(30_000));
/// assert_eq!(body.error, "timeout");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `not_found` or `script_error`
    pub error: String,
    /// Human-readable description, including the script's exception message
    pub message: String,
    /// Captured console output when the error came from script execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl ErrorBody {
    pub fn from_error(err: &ScriptgateError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
            logs: Vec::new(),
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }
}

// ============================================================================
// Raw Execution
// ============================================================================

/// Ad-hoc script submitted to `POST /_admin/execute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteRequest {
    /// Script source to evaluate on the execution lane
    pub code: String,
    /// Label used for archiving and execution history
    #[serde(default)]
    pub name: Option<String>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parses an execute body.
    ///
    /// JSON bodies must carry a `code` field; anything else is taken verbatim
    /// as script text.
    pub fn from_body(body: &[u8], content_type: Option<&str>) -> Result<Self> {
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);

        if is_json {
            return serde_json::from_slice(body).map_err(ScriptgateError::from);
        }

        let code = std::str::from_utf8(body)
            .map_err(|e| ScriptgateError::InvalidRequest(format!("Script is not valid UTF-8: {}", e)))?;
        Ok(Self::new(code))
    }

    /// Name used when the caller did not supply one.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

/// Result of a raw execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResponse {
    /// Completion value of the script, converted to JSON
    pub result: Value,
    /// Console lines captured while the script ran
    pub logs: Vec<String>,
    /// Exception message when the script threw
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ============================================================================
// Handler Introspection
// ============================================================================

/// One registered handler as reported by `GET /_admin/handlers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandlerInfo {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    /// Parameter names in pattern order
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteHandlerResponse {
    pub deleted: bool,
    pub method: String,
    pub path: String,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always "healthy" when the endpoint responds
    pub status: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_from_json_body() {
        let body = br#"{"code": "1 + 1", "name": "sum"}"#;
        let req = ExecuteRequest::from_body(body, Some("application/json")).unwrap();
        assert_eq!(req.code, "1 + 1");
        assert_eq!(req.label(), "sum");
    }

    #[test]
    fn test_execute_request_from_raw_body() {
        let body = b"registerHandler('GET', '/x', () => 1);";
        let req = ExecuteRequest::from_body(body, Some("application/javascript")).unwrap();
        assert_eq!(req.code, "registerHandler('GET', '/x', () => 1);");
        assert_eq!(req.label(), "anonymous");
    }

    #[test]
    fn test_execute_request_json_without_code_is_rejected() {
        let body = br#"{"name": "nothing"}"#;
        let err = ExecuteRequest::from_body(body, Some("application/json")).unwrap_err();
        assert_eq!(err.kind(), "invalid_json");
    }

    #[test]
    fn test_error_body_skips_empty_logs() {
        let body = ErrorBody::from_error(&ScriptgateError::ScriptError("boom".into()));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, json!({"error": "script_error", "message": "Script error: boom"}));

        let body = body.with_logs(vec!["before throw".into()]);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["logs"], json!(["before throw"]));
    }

    #[test]
    fn test_health_response() {
        assert_eq!(HealthResponse::healthy().status, "healthy");
    }
}
