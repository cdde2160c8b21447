//! Collaborator interfaces
//!
//! The core never persists anything itself. It talks to three narrow,
//! synchronous traits, and ships in-memory implementations of each:
//!
//! - [`StateStore`]: backing store mirrored by [`GlobalState`](crate::state::GlobalState)
//! - [`ExecutionLog`]: append-only execution history
//! - [`CodeArchive`]: every raw script submitted through the admin API
//!
//! None of these is ever called from the execution lane.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use scriptgate_common::protocol::{Result, TraceId};

/// Backing store for global state.
pub trait StateStore: Send + Sync {
    /// Loads every persisted entry; called once at startup.
    fn load(&self) -> Result<HashMap<String, Value>>;
    fn put(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// A registered handler serving an HTTP request
    Handler,
    /// Ad-hoc code from `POST /_admin/execute`
    Raw,
}

/// One finished (or abandoned) execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: TraceId,
    pub kind: ExecutionKind,
    /// Route key for handlers, the submitted name for raw code
    pub label: String,
    pub started_at_ms: u64,
    pub elapsed_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

pub trait ExecutionLog: Send + Sync {
    fn append(&self, record: ExecutionRecord) -> Result<()>;
    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>>;
}

pub trait CodeArchive: Send + Sync {
    fn archive(&self, name: &str, timestamp_ms: u64, code: &str) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with `values`, as if left over from a previous run.
    pub fn with_values(values: HashMap<String, Value>) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        lock(&self.values).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<HashMap<String, Value>> {
        Ok(self.snapshot())
    }

    fn put(&self, key: &str, value: &Value) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        lock(&self.values).clear();
        Ok(())
    }
}

pub const DEFAULT_EXECUTION_LOG_CAPACITY: usize = 1000;

/// Ring buffer keeping the most recent executions.
#[derive(Debug)]
pub struct MemoryExecutionLog {
    records: Mutex<VecDeque<ExecutionRecord>>,
    capacity: usize,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EXECUTION_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLog for MemoryExecutionLog {
    fn append(&self, record: ExecutionRecord) -> Result<()> {
        let mut records = lock(&self.records);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(lock(&self.records).iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedScript {
    pub name: String,
    pub timestamp_ms: u64,
    pub code: String,
}

#[derive(Debug, Default)]
pub struct MemoryCodeArchive {
    entries: Mutex<Vec<ArchivedScript>>,
}

impl MemoryCodeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archived scripts, oldest first.
    pub fn entries(&self) -> Vec<ArchivedScript> {
        lock(&self.entries).clone()
    }
}

impl CodeArchive for MemoryCodeArchive {
    fn archive(&self, name: &str, timestamp_ms: u64, code: &str) -> Result<()> {
        lock(&self.entries).push(ArchivedScript {
            name: name.to_string(),
            timestamp_ms,
            code: code.to_string(),
        });
        Ok(())
    }
}
