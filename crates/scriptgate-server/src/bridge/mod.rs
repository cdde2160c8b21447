//! Request/response bridge
//!
//! Converts HTTP requests into plain snapshots the lane can hand to scripts,
//! and collects what a handler writes into a response the HTTP task can send.

pub mod request;
pub mod response;

pub use request::{decode_body, parse_query, ScriptRequest};
pub use response::{ResponseBody, ResponseState, ScriptResponse, HTML_CONTENT_TYPE, TEXT_CONTENT_TYPE};
