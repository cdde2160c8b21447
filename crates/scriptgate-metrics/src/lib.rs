//! Scriptgate Metrics Collection
//!
//! Thread-safe request metrics for the scriptgate gateway: global request
//! counters, open connection count, and per-route call counts with latency
//! percentiles.
//!
//! - [`MetricsRegistry`]: storage, lock-free on the hot path
//! - [`MetricsCollector`]: the trait the HTTP layer records through
//! - [`MetricsSnapshot`]: serializable point-in-time view, served by
//!   `GET /_admin/status`
//!
//! ```rust
//! use scriptgate_metrics::{GatewayMetricsCollector, MetricsCollector, Outcome};
//! use std::time::Instant;
//!
//! let collector = GatewayMetricsCollector::new();
//! let start = Instant::now();
//! // ... dispatch the request ...
//! collector.record_call("GET /users/:id", start, Outcome::Success);
//!
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.successful_requests, 1);
//! ```
//!
//! Routes are keyed by `"METHOD /pattern"`, never by the concrete request
//! path, so `/users/1` and `/users/2` share one entry. Idle routes are swept
//! on a TTL and the set is capped with LRU eviction (see [`MetricsConfig`]).
//
// Copyright 2025 Scriptgate Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod collector;
mod registry;
mod snapshot;

pub use collector::{GatewayMetricsCollector, MetricsCollector};
pub use registry::{MetricsConfig, MetricsRegistry};
pub use snapshot::{MetricsSnapshot, Outcome, RouteMetrics, ServerInfo};
