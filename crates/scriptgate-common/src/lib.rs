//! scriptgate Common Types and Transport
//!
//! Shared infrastructure for the scriptgate workspace:
//!
//! - **Protocol Layer**: the [`ScriptgateError`] taxonomy, admin API bodies and
//!   trace-id generation
//! - **Transport Layer**: hyper type aliases and JSON/error response helpers
//! - **Auth**: optional API-key guard for the admin surface
//!
//! # Error taxonomy
//!
//! | Error | HTTP status |
//! |-------|-------------|
//! | `InvalidPattern` | 400 |
//! | `NotFound` | 404 |
//! | `MethodNotAllowed` | 405 |
//! | `Timeout` | 408 |
//! | `ScriptError` | 500 |
//! | `QueueFull` | 503 |
//!
//! # Example
//!
//! ```
//! use scriptgate_common::{ScriptgateError, ErrorBody};
//!
//! let err = ScriptgateError::ScriptError("TypeError: x is undefined".into());
//! let body = ErrorBody::from_error(&err);
//! assert_eq!(body.error, "script_error");
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
