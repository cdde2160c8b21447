//! scriptgate Server
//!
//! HTTP endpoints defined at runtime by JavaScript. Scripts call
//! `registerHandler(method, path, fn)`; matching requests are converted into
//! script values, run on a single execution lane that owns the Boa engine,
//! and the handler's output is written back as the HTTP response.
//!
//! ```text
//! hyper connection task ─► GatewayRouter ─► Gateway ─► HandlerRegistry (lookup)
//!                                              │
//!                                              ▼
//!                                         Dispatcher ─► lane thread (Boa Context)
//!                                              ▲                │
//!                                              └── oneshot ─────┘
//! ```
//!
//! The lane runs one job at a time, so script-visible side effects of two
//! requests never interleave.

pub mod bridge;
pub mod dispatcher;
pub mod gateway;
pub mod http_router;
pub mod http_server;
pub mod path;
pub mod persistence;
pub mod registry;
pub mod resource_limits;
pub mod runtime;
pub mod state;

pub use bridge::{ScriptRequest, ScriptResponse};
pub use dispatcher::{Dispatcher, ExecutionResult, InvokeOutcome};
pub use gateway::{Collaborators, Gateway, GatewayConfig, GatewayStatus};
pub use http_router::GatewayRouter;
pub use http_server::HttpServer;
pub use path::{Params, PathPattern};
pub use persistence::{
    CodeArchive, ExecutionKind, ExecutionLog, ExecutionRecord, MemoryCodeArchive,
    MemoryExecutionLog, MemoryStateStore, StateStore,
};
pub use registry::{HandlerDescriptor, HandlerId, HandlerRegistry, RouteMatch};
pub use resource_limits::ResourceLimits;
pub use state::GlobalState;
