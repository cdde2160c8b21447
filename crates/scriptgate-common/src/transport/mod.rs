//! Transport Layer
//!
//! The gateway speaks plain HTTP/1.1 through hyper. This module holds the
//! response-building helpers shared by the server's router and admin surface.

pub mod http;

pub use http::{HttpTransport, HyperRequest, HyperResponse, JSON_CONTENT_TYPE};
