//! HTTP Transport Utilities
//!
//! Helpers shared by the gateway's hyper service:
//! - Type aliases for Hyper request/response types
//! - Building JSON responses with a given status
//! - Rendering a [`ScriptgateError`] as a well-formed error response
//!
//! # Example
//!
//! ```
//! use scriptgate_common::transport::http::HttpTransport;
//! use scriptgate_common::protocol::ScriptgateError;
//! use hyper::StatusCode;
//! use serde_json::json;
//!
//! let ok = HttpTransport::json_response(StatusCode::OK, &json!({"ok": true}));
//! assert_eq!(ok.status(), StatusCode::OK);
//!
//! let err = HttpTransport::error_response(&ScriptgateError::Timeout(100));
//! assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);
//! ```

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;

use crate::protocol::{ErrorBody, ScriptgateError};

/// Type alias for Hyper incoming requests
pub type HyperRequest = Request<Incoming>;

/// Type alias for Hyper responses with full body
pub type HyperResponse = Response<Full<Bytes>>;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP transport utility functions
pub struct HttpTransport;

impl HttpTransport {
    /// Serializes `value` as the JSON body of a response with `status`.
    ///
    /// Serialization failures degrade to a 500 with a fixed body rather than
    /// panicking inside the connection task.
    pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> HyperResponse {
        match serde_json::to_vec(value) {
            Ok(body) => Self::bytes_response(status, JSON_CONTENT_TYPE, Bytes::from(body)),
            Err(e) => {
                let fallback = format!(
                    r#"{{"error":"internal","message":"failed to serialize response: {}"}}"#,
                    e.to_string().replace('"', "'")
                );
                Self::bytes_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    JSON_CONTENT_TYPE,
                    Bytes::from(fallback),
                )
            }
        }
    }

    /// Renders an error as `{"error": kind, "message": ...}` with its mapped status.
    pub fn error_response(err: &ScriptgateError) -> HyperResponse {
        Self::error_response_with_logs(err, Vec::new())
    }

    /// Like [`HttpTransport::error_response`], attaching captured console lines.
    pub fn error_response_with_logs(err: &ScriptgateError, logs: Vec<String>) -> HyperResponse {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Self::json_response(status, &ErrorBody::from_error(err).with_logs(logs));

        if let ScriptgateError::MethodNotAllowed { allowed, .. } = err {
            if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                response.headers_mut().insert(ALLOW, value);
            }
        }

        response
    }

    /// Response with an explicit content type and a pre-encoded body.
    pub fn bytes_response(status: StatusCode, content_type: &str, body: Bytes) -> HyperResponse {
        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }
}
