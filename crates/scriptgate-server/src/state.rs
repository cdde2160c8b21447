//! Global script state
//!
//! A process-wide key → JSON map shared by every handler. Scripts mutate it
//! from the execution lane through the `state` global; admin endpoints read
//! it out of band. When a [`StateStore`] is attached, every change is
//! forwarded to it over an unbounded channel drained on a blocking task, so
//! the lane never waits on persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use scriptgate_common::protocol::Result;

use crate::persistence::StateStore;

#[derive(Debug, Clone, PartialEq)]
enum StateChange {
    Put(String, Value),
    Remove(String),
    Clear,
}

#[derive(Debug, Default)]
pub struct GlobalState {
    values: RwLock<HashMap<String, Value>>,
    mirror: Option<mpsc::UnboundedSender<StateChange>>,
}

impl GlobalState {
    /// State that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `store` and mirrors every later change into it.
    ///
    /// Must be called inside a tokio runtime. The returned handle finishes
    /// once the state is dropped and every queued change has been written.
    pub fn with_store(store: Arc<dyn StateStore>) -> Result<(Self, JoinHandle<()>)> {
        let initial = store.load()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<StateChange>();

        let writer = tokio::task::spawn_blocking(move || {
            while let Some(change) = rx.blocking_recv() {
                let result = match &change {
                    StateChange::Put(key, value) => store.put(key, value),
                    StateChange::Remove(key) => store.remove(key),
                    StateChange::Clear => store.clear(),
                };
                if let Err(e) = result {
                    tracing::warn!(?change, "Failed to mirror state change: {}", e);
                }
            }
        });

        tracing::debug!(keys = initial.len(), "Loaded global state from store");

        let state = Self {
            values: RwLock::new(initial),
            mirror: Some(tx),
        };
        Ok((state, writer))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.write().insert(key.to_string(), value.clone());
        self.forward(StateChange::Put(key.to_string(), value));
    }

    /// Returns whether the key existed.
    pub fn delete(&self, key: &str) -> bool {
        let existed = self.write().remove(key).is_some();
        if existed {
            self.forward(StateChange::Remove(key.to_string()));
        }
        existed
    }

    pub fn clear(&self) {
        self.write().clear();
        self.forward(StateChange::Clear);
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    fn forward(&self, change: StateChange) {
        if let Some(mirror) = &self.mirror {
            if mirror.send(change).is_err() {
                tracing::warn!("State mirror has stopped; change not persisted");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.values.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.values.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
