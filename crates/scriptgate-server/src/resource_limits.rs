//! Resource limits for script execution.
//!
//! Bounds on how long a caller waits for the execution lane, how many jobs
//! may queue in front of it, how far a single synchronous script may run
//! before Boa aborts it, and how large a request body may be.

use std::time::Duration;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 10_000_000;
pub const DEFAULT_RECURSION_LIMIT: usize = 512;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Resource limits for the execution lane.
///
/// # Memory Limiting
///
/// Boa has no heap limit, so memory is not bounded. Runaway loops and
/// recursion are cut off by Boa's runtime limits and surface as script errors.
///
/// # Example
///
/// ```
/// use scriptgate_server::ResourceLimits;
/// use std::time::Duration;
///
/// let limits = ResourceLimits::new()
///     .with_execution_timeout(Duration::from_secs(5))
///     .with_queue_capacity(64);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// How long a submitter waits for its job, queueing included
    pub execution_timeout: Duration,
    /// Jobs that may wait in front of the lane
    pub queue_capacity: usize,
    /// Boa loop iteration limit per evaluation
    pub loop_iteration_limit: u64,
    /// Boa recursion limit
    pub recursion_limit: usize,
    /// Larger request bodies are rejected before any script runs
    pub max_body_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Execution timeout is zero or longer than 1 hour
    /// - Queue capacity, loop limit or recursion limit is zero
    pub fn validate(&self) -> Result<(), String> {
        if self.execution_timeout.is_zero() {
            return Err("execution timeout must be greater than zero".to_string());
        }

        if self.execution_timeout > Duration::from_secs(3600) {
            return Err(format!(
                "execution timeout must be <= 1 hour (got {} seconds)",
                self.execution_timeout.as_secs()
            ));
        }

        if self.queue_capacity == 0 {
            return Err("queue capacity must be greater than zero".to_string());
        }

        if self.loop_iteration_limit == 0 {
            return Err("loop iteration limit must be greater than zero".to_string());
        }

        if self.recursion_limit == 0 {
            return Err("recursion limit must be greater than zero".to_string());
        }

        Ok(())
    }
}
