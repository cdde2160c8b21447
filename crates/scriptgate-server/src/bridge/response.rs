//! Script response accumulation and rendering
//!
//! While a handler runs, its `response` object writes into a
//! [`ResponseState`]. When the handler completes, the state is frozen into a
//! [`ScriptResponse`], which is `Send` and travels back to the HTTP task.
//!
//! Body precedence: the first body write wins and later writes are silent
//! no-ops; an explicit `Content-Type` header beats any inferred type.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde_json::Value;

use scriptgate_common::transport::{HyperResponse, JSON_CONTENT_TYPE};

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// A body written by the handler, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Html(String),
}

impl ResponseBody {
    /// Infers a body from a returned (or `send()`-ed) value.
    ///
    /// Strings that look like markup become HTML, other strings plain text,
    /// everything else JSON. `null` yields no body.
    pub fn infer(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => {
                if looks_like_markup(&s) {
                    Some(ResponseBody::Html(s))
                } else {
                    Some(ResponseBody::Text(s))
                }
            }
            other => Some(ResponseBody::Json(other)),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Json(_) => JSON_CONTENT_TYPE,
            ResponseBody::Text(_) => TEXT_CONTENT_TYPE,
            ResponseBody::Html(_) => HTML_CONTENT_TYPE,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            // Serializing a Value cannot fail: its map keys are always strings.
            ResponseBody::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
            ResponseBody::Text(s) | ResponseBody::Html(s) => s.clone().into_bytes(),
        }
    }
}

fn looks_like_markup(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.starts_with('<') && trimmed.ends_with('>')
}

/// Mutable response under construction inside the lane.
#[derive(Debug, Clone)]
pub struct ResponseState {
    status: u16,
    headers: Vec<(String, String)>,
    body: Option<(ResponseBody, String)>,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: None,
        }
    }
}

impl ResponseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status. The caller validates the 100..=599 range.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets a header, replacing any earlier value under the same name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(existing, _)| *existing != name);
        self.headers.push((name, value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, v)| v.as_str())
    }

    /// Writes an explicit body (`json()`, `text()`, `html()`).
    ///
    /// Returns `false` when a body was already written.
    pub fn write(&mut self, body: ResponseBody) -> bool {
        let content_type = body.content_type().to_string();
        self.write_with_type(body, content_type)
    }

    /// Writes an inferred body (a returned value or `send()`).
    ///
    /// The handler's declared content type, when present, replaces the
    /// inferred one. `null` writes nothing and returns `false`.
    pub fn write_inferred(&mut self, value: Value, declared: Option<&str>) -> bool {
        if self.has_body() {
            return false;
        }
        let Some(body) = ResponseBody::infer(value) else {
            return false;
        };
        let content_type = declared
            .map(str::to_string)
            .unwrap_or_else(|| body.content_type().to_string());
        self.write_with_type(body, content_type)
    }

    fn write_with_type(&mut self, body: ResponseBody, content_type: String) -> bool {
        if self.has_body() {
            return false;
        }
        self.body = Some((body, content_type));
        true
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Freezes the state into a sendable response.
    pub fn finish(self) -> ScriptResponse {
        let (body, body_type) = match self.body {
            Some((body, content_type)) => (body.encode(), Some(content_type)),
            None => (Vec::new(), None),
        };

        let explicit_type = self
            .headers
            .iter()
            .find(|(name, _)| name == "content-type")
            .map(|(_, v)| v.clone());

        let headers = self
            .headers
            .into_iter()
            .filter(|(name, _)| name != "content-type")
            .collect();

        ScriptResponse {
            status: self.status,
            headers,
            content_type: explicit_type.or(body_type),
            body,
        }
    }
}

/// A completed handler response, independent of the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    pub status: u16,
    /// Lower-case names, content type excluded
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ScriptResponse {
    /// The empty 200 emitted when a handler produced nothing.
    pub fn empty() -> Self {
        ResponseState::new().finish()
    }

    /// Converts into a hyper response. Headers hyper rejects are dropped with a warning.
    pub fn into_hyper(self) -> HyperResponse {
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(header = %name, "Dropping invalid response header"),
            }
        }

        if let Some(content_type) = self.content_type {
            match HeaderValue::from_str(&content_type) {
                Ok(value) => {
                    headers.insert(CONTENT_TYPE, value);
                }
                Err(_) => tracing::warn!(%content_type, "Dropping invalid content type"),
            }
        }

        response
    }
}
