use thiserror::Error;

/// Every failure the gateway can surface to a caller.
///
/// Each variant maps onto exactly one HTTP status (see [`ScriptgateError::status_code`])
/// and one stable machine-readable kind (see [`ScriptgateError::kind`]), so every
/// error path can still be rendered as a well-formed HTTP response.
#[derive(Error, Debug)]
pub enum ScriptgateError {
    /// Malformed path pattern at registration time. Registration does not happen.
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// No handler matches the method + path. No script runs.
    #[error("No handler registered for {method} {path}")]
    NotFound { method: String, path: String },

    /// The path is served, just not for this method.
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<String>,
    },

    /// An exception or runtime-limit error raised while running script code.
    #[error("Script error: {0}")]
    ScriptError(String),

    /// The submitter stopped waiting. The job may still finish later; its result is discarded.
    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    /// The body did not parse per its declared content type.
    ///
    /// Never fatal for a request: scripts receive the raw text instead.
    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    /// The execution lane is gone or its queue stayed full past the deadline.
    #[error("Execution queue unavailable: {0}")]
    QueueFull(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptgateError {
    /// Convenience constructor used by the path compiler.
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        ScriptgateError::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            ScriptgateError::InvalidPattern { .. } => 400,
            ScriptgateError::NotFound { .. } => 404,
            ScriptgateError::MethodNotAllowed { .. } => 405,
            ScriptgateError::ScriptError(_) => 500,
            ScriptgateError::Timeout(_) => 408,
            ScriptgateError::MalformedBody(_) => 400,
            ScriptgateError::QueueFull(_) => 503,
            ScriptgateError::Unauthorized(_) => 401,
            ScriptgateError::InvalidRequest(_) => 400,
            ScriptgateError::JsonSerialization(_) => 400,
            ScriptgateError::Transport(_) | ScriptgateError::Io(_) => 500,
        }
    }

    /// Short snake_case identifier placed in the `error` field of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptgateError::InvalidPattern { .. } => "invalid_pattern",
            ScriptgateError::NotFound { .. } => "not_found",
            ScriptgateError::MethodNotAllowed { .. } => "method_not_allowed",
            ScriptgateError::ScriptError(_) => "script_error",
            ScriptgateError::Timeout(_) => "timeout",
            ScriptgateError::MalformedBody(_) => "malformed_body",
            ScriptgateError::QueueFull(_) => "queue_full",
            ScriptgateError::Unauthorized(_) => "unauthorized",
            ScriptgateError::InvalidRequest(_) => "invalid_request",
            ScriptgateError::JsonSerialization(_) => "invalid_json",
            ScriptgateError::Transport(_) => "transport",
            ScriptgateError::Io(_) => "io",
        }
    }
}

impl From<std::net::AddrParseError> for ScriptgateError {
    fn from(err: std::net::AddrParseError) -> Self {
        ScriptgateError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScriptgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(ScriptgateError::invalid_pattern("/a/:x/:x", "dup").status_code(), 400);
        assert_eq!(
            ScriptgateError::NotFound { method: "GET".into(), path: "/x".into() }.status_code(),
            404
        );
        assert_eq!(ScriptgateError::ScriptError("boom".into()).status_code(), 500);
        assert_eq!(ScriptgateError::Timeout(30_000).status_code(), 408);
        assert_eq!(ScriptgateError::QueueFull("closed".into()).status_code(), 503);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = ScriptgateError::invalid_pattern("/a/:x/:x", "parameter 'x' repeats");
        assert_eq!(
            err.to_string(),
            "Invalid path pattern '/a/:x/:x': parameter 'x' repeats"
        );

        let err = ScriptgateError::Timeout(250);
        assert_eq!(err.to_string(), "Execution timed out after 250ms");
    }

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(ScriptgateError::ScriptError("x".into()).kind(), "script_error");
        assert_eq!(ScriptgateError::Timeout(1).kind(), "timeout");
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(ScriptgateError::from(parse_err).kind(), "invalid_json");
    }
}
