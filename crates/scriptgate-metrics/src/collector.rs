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

use crate::registry::{MetricsConfig, MetricsRegistry};
use crate::snapshot::{MetricsSnapshot, Outcome, ServerInfo};
use std::sync::Arc;
use std::time::Instant;

/// Metrics sink used by the gateway's HTTP layer.
///
/// The gateway holds an `Arc<dyn MetricsCollector>`, so tests and embedders
/// can swap in their own implementation.
pub trait MetricsCollector: Send + Sync {
    /// Records a dispatched request. `route` is `"METHOD /pattern"`.
    fn record_call(&self, route: &str, start_time: Instant, outcome: Outcome);

    /// Records a request that matched no handler.
    fn record_unmatched(&self);

    fn connection_opened(&self);

    fn connection_closed(&self);

    fn snapshot(&self) -> MetricsSnapshot;

    fn server_info(&self) -> ServerInfo;
}

/// Default collector backed by a [`MetricsRegistry`].
///
/// ```rust
/// use scriptgate_metrics::{GatewayMetricsCollector, MetricsCollector, Outcome};
/// use std::time::Instant;
///
/// let collector = GatewayMetricsCollector::new();
/// collector.record_call("GET /echo/:name", Instant::now(), Outcome::Success);
/// collector.record_unmatched();
///
/// let snapshot = collector.snapshot();
/// assert_eq!(snapshot.total_requests, 2);
/// ```
pub struct GatewayMetricsCollector {
    registry: Arc<MetricsRegistry>,
}

impl GatewayMetricsCollector {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            registry: Arc::new(MetricsRegistry::with_config(config)),
        }
    }

    /// Shares an existing registry, e.g. between a test and the gateway under test.
    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }
}

impl Default for GatewayMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for GatewayMetricsCollector {
    fn record_call(&self, route: &str, start_time: Instant, outcome: Outcome) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.registry.record_route_call(route, latency_us, outcome);
    }

    fn record_unmatched(&self) {
        self.registry.record_unmatched();
    }

    fn connection_opened(&self) {
        self.registry.increment_active_connections();
    }

    fn connection_closed(&self) {
        self.registry.decrement_active_connections();
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo::new(self.registry.uptime_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_records_through_shared_registry() {
        let registry = Arc::new(MetricsRegistry::new());
        let collector = GatewayMetricsCollector::with_registry(Arc::clone(&registry));

        collector.record_call("POST /items", Instant::now(), Outcome::Success);
        collector.record_call("POST /items", Instant::now(), Outcome::Failure);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.routes["POST /items"].call_count, 2);
        assert_eq!(snapshot.failed_requests, 1);
    }

    #[test]
    fn test_connection_tracking() {
        let collector = GatewayMetricsCollector::new();
        collector.connection_opened();
        collector.connection_opened();
        collector.connection_closed();
        assert_eq!(collector.snapshot().active_connections, 1);
    }

    #[test]
    fn test_dyn_collector() {
        let collector: Arc<dyn MetricsCollector> = Arc::new(GatewayMetricsCollector::new());
        collector.record_unmatched();
        assert_eq!(collector.snapshot().unmatched_requests, 1);
        assert_eq!(collector.server_info().name, "scriptgate");
    }
}
