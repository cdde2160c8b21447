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

use crate::snapshot::{MetricsSnapshot, Outcome, RouteMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Nine bins per decade (leading digit 1..=9), ten decades: 1μs up to ~2.7h.
const BINS_PER_DECADE: usize = 9;
const NUM_DECADES: usize = 10;
const NUM_HISTOGRAM_BINS: usize = BINS_PER_DECADE * NUM_DECADES;

/// How often (in recorded calls) stale routes are swept.
const CLEANUP_INTERVAL: u64 = 1000;

/// Limits on how many routes are tracked and for how long.
///
/// Scripts can register and drop handlers at any time, so route entries that
/// stop receiving traffic are evicted after `route_ttl_secs`, and the least
/// recently used entries go first once `max_routes` is exceeded.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub max_routes: usize,
    pub route_ttl_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_routes: 1000,
            route_ttl_secs: 3600,
        }
    }
}

/// Log-bucketed latency histogram.
///
/// A sample lands in the bin for its decade and leading digit, so the bin
/// `[300μs, 400μs)` sits next to `[400μs, 500μs)`. Percentiles interpolate
/// linearly inside the winning bin.
#[derive(Debug)]
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.bins[Self::latency_to_bin(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        let value = latency_us.max(1);
        let decade = value.ilog10() as usize;
        if decade >= NUM_DECADES {
            return NUM_HISTOGRAM_BINS - 1;
        }
        let leading = (value / 10u64.pow(decade as u32)) as usize;
        decade * BINS_PER_DECADE + (leading - 1)
    }

    /// Inclusive lower and exclusive upper bound of a bin, in microseconds.
    fn bin_bounds(bin: usize) -> (u64, u64) {
        let decade = (bin / BINS_PER_DECADE) as u32;
        let leading = (bin % BINS_PER_DECADE) as u64 + 1;
        let unit = 10u64.pow(decade);
        (leading * unit, (leading + 1) * unit)
    }

    fn estimate_percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = ((total * percentile).div_ceil(100)).max(1);
        let mut cumulative = 0;

        for (bin, counter) in self.bins.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            if cumulative + count >= target {
                let (lower, upper) = Self::bin_bounds(bin);
                let fraction = (target - cumulative) as f64 / count as f64;
                return lower + (fraction * (upper - lower) as f64) as u64;
            }
            cumulative += count;
        }

        Self::bin_bounds(NUM_HISTOGRAM_BINS - 1).1
    }

    /// Returns `(avg, p50, p95, p99)` in microseconds.
    fn calculate_percentiles(&self) -> (u64, u64, u64, u64) {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return (0, 0, 0, 0);
        }

        let avg = self.total_latency.load(Ordering::Relaxed) / total;
        (
            avg,
            self.estimate_percentile(50),
            self.estimate_percentile(95),
            self.estimate_percentile(99),
        )
    }
}

#[derive(Debug)]
struct RouteStats {
    call_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    latencies: LatencyHistogram,
    /// Milliseconds since the registry started, for TTL and LRU eviction
    last_access_ms: AtomicU64,
}

impl RouteStats {
    fn new(now_ms: u64) -> Self {
        Self {
            call_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            last_access_ms: AtomicU64::new(now_ms),
        }
    }

    fn record(&self, latency_us: u64, outcome: Outcome, now_ms: u64) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Success => self.success_count.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.failure_count.fetch_add(1, Ordering::Relaxed),
            Outcome::Timeout => self.timeout_count.fetch_add(1, Ordering::Relaxed),
        };
        self.latencies.record(latency_us);
        self.last_access_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouteMetrics {
        let (avg_latency_us, p50_latency_us, p95_latency_us, p99_latency_us) =
            self.latencies.calculate_percentiles();

        RouteMetrics {
            call_count: self.call_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            timeout_count: self.timeout_count.load(Ordering::Relaxed),
            avg_latency_us,
            p50_latency_us,
            p95_latency_us,
            p99_latency_us,
        }
    }
}

/// Thread-safe metrics storage.
///
/// Global counters are plain atomics. Per-route stats live behind an `RwLock`
/// that is only write-locked to insert a new route or to sweep stale ones;
/// recording into an existing route takes the read lock and touches atomics.
///
/// ```rust
/// use scriptgate_metrics::{MetricsRegistry, Outcome};
///
/// let registry = MetricsRegistry::new();
/// registry.record_route_call("GET /users/:id", 150, Outcome::Success);
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot.total_requests, 1);
/// assert_eq!(snapshot.routes["GET /users/:id"].call_count, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    timed_out_requests: AtomicU64,
    unmatched_requests: AtomicU64,
    active_connections: AtomicU64,
    routes: RwLock<HashMap<String, Arc<RouteStats>>>,
    start_time: Instant,
    config: MetricsConfig,
    cleanup_counter: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            timed_out_requests: AtomicU64::new(0),
            unmatched_requests: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            routes: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
            config,
            cleanup_counter: AtomicU64::new(0),
        }
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        // Saturate so an unmatched decrement can never wrap to u64::MAX
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// A request that matched no handler. Counted globally, never per route.
    pub fn record_unmatched(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.unmatched_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one dispatched request against `route`.
    pub fn record_route_call(&self, route: &str, latency_us: u64, outcome: Outcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Success => self.successful_requests.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.failed_requests.fetch_add(1, Ordering::Relaxed),
            Outcome::Timeout => self.timed_out_requests.fetch_add(1, Ordering::Relaxed),
        };

        self.maybe_cleanup();

        let now = self.uptime_ms();
        let existing = self.read_routes().get(route).cloned();
        let stats = match existing {
            Some(stats) => stats,
            None => self
                .write_routes()
                .entry(route.to_string())
                .or_insert_with(|| Arc::new(RouteStats::new(now)))
                .clone(),
        };

        stats.record(latency_us, outcome, now);
    }

    fn maybe_cleanup(&self) {
        let count = self.cleanup_counter.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % CLEANUP_INTERVAL == 0 {
            self.cleanup_stale_routes();
        }
    }

    /// Drops routes idle past the TTL, then evicts LRU routes down to `max_routes`.
    pub fn cleanup_stale_routes(&self) {
        let now = self.uptime_ms();
        let ttl_ms = self.config.route_ttl_secs.saturating_mul(1000);
        let mut routes = self.write_routes();

        routes.retain(|_, stats| {
            now.saturating_sub(stats.last_access_ms.load(Ordering::Relaxed)) < ttl_ms
        });

        if routes.len() > self.config.max_routes {
            let mut entries: Vec<(String, u64)> = routes
                .iter()
                .map(|(name, stats)| (name.clone(), stats.last_access_ms.load(Ordering::Relaxed)))
                .collect();
            entries.sort_by_key(|&(_, last_access)| last_access);

            let to_remove = entries.len() - self.config.max_routes;
            for (name, _) in entries.into_iter().take(to_remove) {
                routes.remove(&name);
            }
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let routes = self
            .read_routes()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            timed_out_requests: self.timed_out_requests.load(Ordering::Relaxed),
            unmatched_requests: self.unmatched_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
            routes,
        }
    }

    fn read_routes(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RouteStats>>> {
        self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_routes(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RouteStats>>> {
        self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
