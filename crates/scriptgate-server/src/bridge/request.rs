//! Native request snapshots
//!
//! [`ScriptRequest`] captures everything a handler may read from an HTTP
//! request as plain data, so it can cross from the connection task to the
//! execution lane. On the lane it becomes the handler's `request` argument:
//!
//! ```text
//! { method, url, path, query, headers, body, params, ip, id }
//! ```

use std::net::SocketAddr;

use boa_engine::{Context, JsValue};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::http::request::Parts;
use serde_json::{Map, Value};

use scriptgate_common::protocol::{Result, ScriptgateError, TraceId};

use crate::path::Params;
use crate::runtime::conversions::json_to_js_value;

/// Interpreter-independent view of one HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptRequest {
    /// Lower-cased method
    pub method: String,
    /// Full URL: scheme, Host header, path and query
    pub url: String,
    pub path: String,
    /// A key seen once maps to a string, a repeated key to an array of strings
    pub query: Map<String, Value>,
    /// Lower-cased names; the last value wins
    pub headers: Map<String, Value>,
    /// Decoded per content type; `null` when empty
    pub body: Value,
    pub params: Params,
    pub ip: Option<String>,
    pub id: TraceId,
}

impl ScriptRequest {
    pub fn from_parts(
        parts: &Parts,
        body: &[u8],
        params: Params,
        peer: Option<SocketAddr>,
        id: TraceId,
    ) -> Self {
        let mut headers = Map::new();
        for (name, value) in &parts.headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers.insert(name.as_str().to_ascii_lowercase(), Value::String(value));
        }

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");

        let path = parts.uri.path().to_string();
        let query = parts.uri.query();

        Self {
            method: parts.method.as_str().to_ascii_lowercase(),
            url: full_url(host, &path, query),
            path,
            query: parse_query(query),
            headers,
            body: decode_body(body, content_type),
            params,
            ip: peer.map(|addr| addr.ip().to_string()),
            id,
        }
    }

    /// The snapshot as the JSON object handed to scripts.
    pub fn to_json(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut object = Map::new();
        object.insert("method".into(), Value::String(self.method.clone()));
        object.insert("url".into(), Value::String(self.url.clone()));
        object.insert("path".into(), Value::String(self.path.clone()));
        object.insert("query".into(), Value::Object(self.query.clone()));
        object.insert("headers".into(), Value::Object(self.headers.clone()));
        object.insert("body".into(), self.body.clone());
        object.insert("params".into(), Value::Object(params));
        object.insert(
            "ip".into(),
            self.ip.clone().map(Value::String).unwrap_or(Value::Null),
        );
        // Trace ids exceed 2^53, so scripts see them as hex strings
        object.insert("id".into(), Value::String(format!("{:016x}", self.id)));
        Value::Object(object)
    }

    /// Builds the interpreter value passed as the handler's first argument.
    pub fn to_script_value(&self, ctx: &mut Context) -> Result<JsValue> {
        json_to_js_value(self.to_json(), ctx)
    }
}

fn full_url(host: &str, path: &str, query: Option<&str>) -> String {
    let raw = match query {
        Some(q) => format!("http://{}{}?{}", host, path, q),
        None => format!("http://{}{}", host, path),
    };
    url::Url::parse(&raw)
        .map(|u| u.to_string())
        .unwrap_or(raw)
}

/// Parses a query string; repeated keys collect into arrays.
pub fn parse_query(query: Option<&str>) -> Map<String, Value> {
    let mut map = Map::new();
    let Some(query) = query else {
        return map;
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(&*key) {
            None => {
                map.insert(key.into_owned(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    map
}

/// Decodes a request body for scripts.
///
/// JSON content types are parsed; a body that fails to parse is delivered as
/// its raw text instead of failing the request. Other bodies are lossy UTF-8.
pub fn decode_body(body: &[u8], content_type: Option<&str>) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    let is_json = content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            let essence = ct.split(';').next().unwrap_or("").trim().to_string();
            essence == "application/json" || essence.ends_with("+json")
        })
        .unwrap_or(false);

    if is_json {
        match serde_json::from_slice(body) {
            Ok(value) => return value,
            Err(e) => {
                let err = ScriptgateError::MalformedBody(e.to_string());
                tracing::debug!("{}; delivering raw body", err);
            }
        }
    }

    Value::String(String::from_utf8_lossy(body).into_owned())
}
