//! Embedded JavaScript runtime
//!
//! The Boa context never leaves the lane thread started by
//! [`Dispatcher`](crate::Dispatcher). Submodules:
//!
//! - `lane`: the thread, its job loop and the completion sweep
//! - `bindings`: globals exposed to scripts
//! - `local`: lane-local tables the bindings work on
//! - `conversions`: JSON ⇄ JavaScript values
//! - `job_executor`: synchronous promise job queue

mod bindings;
pub mod conversions;
pub mod job_executor;
pub(crate) mod lane;
pub(crate) mod local;

use boa_engine::{Context, JsError};

use scriptgate_common::protocol::ScriptgateError;

pub use job_executor::LaneJobExecutor;

pub(crate) fn script_error(message: impl Into<String>) -> ScriptgateError {
    ScriptgateError::ScriptError(message.into())
}

/// Message of a script error, without the taxonomy prefix.
pub(crate) fn plain_message(err: ScriptgateError) -> String {
    match err {
        ScriptgateError::ScriptError(message) => message,
        other => other.to_string(),
    }
}

/// Renders a thrown value the way a developer expects to read it.
///
/// Thrown strings come out verbatim, `Error` objects as `Name: message`
/// (`Error: boom`), anything else through its display form.
pub(crate) fn describe_error(err: &JsError, ctx: &mut Context) -> String {
    if let Some(message) = err.as_opaque().and_then(|value| value.as_string()) {
        return message.to_std_string_escaped();
    }
    match err.try_native(ctx) {
        Ok(native) => native.to_string(),
        Err(_) => err.to_string(),
    }
}
