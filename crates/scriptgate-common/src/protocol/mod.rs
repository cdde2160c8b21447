pub mod admin;
pub mod error;
pub mod requests;

pub use admin::{
    DeleteHandlerResponse, ErrorBody, ExecuteRequest, ExecuteResponse, HandlerInfo,
    HealthResponse,
};
pub use error::{Result, ScriptgateError};
pub use requests::{generate_trace_id, unix_millis, TraceId};
