//! Handler registry
//!
//! Maps `(method, pattern)` to a [`HandlerDescriptor`]. Parameterless
//! patterns live in an exact-match map; parameterized ones are kept in
//! registration order and scanned.
//!
//! Lookup order: an exact registration always wins; otherwise the matching
//! pattern with the fewest parameters wins, and the earliest registration
//! breaks a remaining tie.
//!
//! The registry only stores [`HandlerId`] handles. The script functions they
//! refer to are owned by the execution lane.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use scriptgate_common::protocol::{HandlerInfo, Result, ScriptgateError};

use crate::path::{normalize_path, Params, PathPattern};

/// Handle to a script callable held by the execution lane.
///
/// A handle never keeps the callable alive. Invoking a released handle
/// resolves the request's route again on the lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocates a fresh, process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    /// Upper-cased HTTP method
    pub method: String,
    pub pattern: PathPattern,
    pub handler: HandlerId,
    /// Content type applied to values the handler returns
    pub content_type: Option<String>,
}

impl HandlerDescriptor {
    /// `"METHOD /pattern"`, used for metrics and execution history.
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.pattern)
    }

    pub fn info(&self) -> HandlerInfo {
        HandlerInfo {
            method: self.method.clone(),
            path: self.pattern.to_string(),
            content_type: self.content_type.clone(),
            params: self.pattern.param_names(),
        }
    }
}

/// A successful lookup: the handler plus the parameters bound from the path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub descriptor: HandlerDescriptor,
    pub params: Params,
}

/// Result of [`HandlerRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub descriptor: HandlerDescriptor,
    /// The descriptor this registration replaced, whose callable should be released
    pub replaced: Option<HandlerDescriptor>,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    descriptor: HandlerDescriptor,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// (method, canonical path) -> parameterless handler
    exact: HashMap<(String, String), Entry>,
    /// Parameterized handlers in registration order
    patterned: Vec<Entry>,
    next_seq: u64,
}

/// Thread-safe handler registry: concurrent lookups, serialized mutation.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the handler for `(method, pattern)`.
    ///
    /// A replacement keeps the original registration's position for tie-breaks.
    pub fn register(
        &self,
        method: &str,
        pattern: &str,
        handler: HandlerId,
        content_type: Option<String>,
    ) -> Result<Registration> {
        let method = normalize_method(method)?;
        let pattern = PathPattern::compile(pattern)?;
        let descriptor = HandlerDescriptor {
            method,
            pattern,
            handler,
            content_type,
        };

        let mut inner = self.write();
        let replaced = if descriptor.pattern.is_exact() {
            let key = (descriptor.method.clone(), descriptor.pattern.to_string());
            match inner.exact.get_mut(&key) {
                Some(entry) => Some(std::mem::replace(&mut entry.descriptor, descriptor.clone())),
                None => {
                    let seq = inner.bump_seq();
                    inner.exact.insert(
                        key,
                        Entry {
                            seq,
                            descriptor: descriptor.clone(),
                        },
                    );
                    None
                }
            }
        } else {
            let existing = inner.patterned.iter_mut().find(|entry| {
                entry.descriptor.method == descriptor.method
                    && entry.descriptor.pattern == descriptor.pattern
            });
            match existing {
                Some(entry) => Some(std::mem::replace(&mut entry.descriptor, descriptor.clone())),
                None => {
                    let seq = inner.bump_seq();
                    inner.patterned.push(Entry {
                        seq,
                        descriptor: descriptor.clone(),
                    });
                    None
                }
            }
        };

        Ok(Registration {
            descriptor,
            replaced,
        })
    }

    /// Resolves a request to a handler.
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = method.to_ascii_uppercase();
        let path = normalize_path(path);
        let inner = self.read();

        if let Some(entry) = inner.exact.get(&(method.clone(), path.to_string())) {
            return Some(RouteMatch {
                descriptor: entry.descriptor.clone(),
                params: Params::new(),
            });
        }

        let mut best: Option<(&Entry, Params)> = None;
        for entry in inner.patterned.iter().filter(|e| e.descriptor.method == method) {
            let Some(params) = entry.descriptor.pattern.matches(path) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, _)) => {
                    entry.descriptor.pattern.param_count() < current.descriptor.pattern.param_count()
                }
            };
            if better {
                best = Some((entry, params));
            }
        }

        best.map(|(entry, params)| RouteMatch {
            descriptor: entry.descriptor.clone(),
            params,
        })
    }

    /// Methods with a handler matching `path`, sorted. Empty means 404.
    pub fn allowed_methods(&self, path: &str) -> Vec<String> {
        let path = normalize_path(path);
        let inner = self.read();

        let mut methods: Vec<String> = inner
            .exact
            .values()
            .filter(|e| e.descriptor.pattern.as_str() == path)
            .chain(inner.patterned.iter().filter(|e| e.descriptor.pattern.matches(path).is_some()))
            .map(|e| e.descriptor.method.clone())
            .collect();
        methods.sort();
        methods.dedup();
        methods
    }

    /// Removes the handler registered for exactly `(method, pattern)`.
    ///
    /// Returns the removed descriptor so its callable can be released.
    /// A pattern that does not compile matches nothing.
    pub fn delete(&self, method: &str, pattern: &str) -> Option<HandlerDescriptor> {
        let method = method.to_ascii_uppercase();
        let pattern = PathPattern::compile(pattern).ok()?;
        let mut inner = self.write();

        if pattern.is_exact() {
            return inner
                .exact
                .remove(&(method, pattern.to_string()))
                .map(|entry| entry.descriptor);
        }

        let position = inner
            .patterned
            .iter()
            .position(|e| e.descriptor.method == method && e.descriptor.pattern == pattern)?;
        Some(inner.patterned.remove(position).descriptor)
    }

    /// All descriptors in registration order.
    pub fn list(&self) -> Vec<HandlerDescriptor> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.exact.values().chain(inner.patterned.iter()).collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Drops every registration, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.write();
        let count = inner.exact.len() + inner.patterned.len();
        inner.exact.clear();
        inner.patterned.clear();
        count
    }

    pub fn len(&self) -> usize {
        let inner = self.read();
        inner.exact.len() + inner.patterned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RegistryInner {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Upper-cases a method and checks it is an HTTP token.
pub fn normalize_method(method: &str) -> Result<String> {
    let valid = !method.is_empty()
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid {
        return Err(ScriptgateError::InvalidRequest(format!(
            "invalid HTTP method '{}'",
            method
        )));
    }
    Ok(method.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn register(registry: &HandlerRegistry, method: &str, pattern: &str) -> HandlerId {
        let id = HandlerId::next();
        registry.register(method, pattern, id, None).unwrap();
        id
    }

    #[test]
    fn test_exact_beats_pattern() {
        let registry = HandlerRegistry::new();
        let param = register(&registry, "GET", "/users/:id");
        let exact = register(&registry, "GET", "/users/me");

        let found = registry.lookup("GET", "/users/me").unwrap();
        assert_eq!(found.descriptor.handler, exact);
        assert!(found.params.is_empty());

        let found = registry.lookup("GET", "/users/7").unwrap();
        assert_eq!(found.descriptor.handler, param);
        assert_eq!(found.params["id"], "7");
    }

    #[test]
    fn test_exact_registration_never_falls_through() {
        let registry = HandlerRegistry::new();
        let exact = register(&registry, "GET", "/a/b");
        register(&registry, "GET", "/:x/:y");
        register(&registry, "GET", "/a/:y");

        for _ in 0..10 {
            assert_eq!(registry.lookup("GET", "/a/b").unwrap().descriptor.handler, exact);
        }
    }

    #[test]
    fn test_fewer_params_win_then_registration_order() {
        let registry = HandlerRegistry::new();
        let two = register(&registry, "GET", "/:a/:b");
        let one_first = register(&registry, "GET", "/x/:b");
        let one_second = register(&registry, "GET", "/:a/y");

        assert_eq!(registry.lookup("GET", "/x/y").unwrap().descriptor.handler, one_first);
        assert_eq!(registry.lookup("GET", "/q/y").unwrap().descriptor.handler, one_second);
        assert_eq!(registry.lookup("GET", "/q/r").unwrap().descriptor.handler, two);
    }

    #[test]
    fn test_reregistration_replaces_and_keeps_slot() {
        let registry = HandlerRegistry::new();
        let first = register(&registry, "GET", "/users/:id");
        let competitor = register(&registry, "GET", "/:kind/42");

        let second = HandlerId::next();
        let registration = registry.register("get", "/users/{id}", second, None).unwrap();
        assert_eq!(registration.replaced.unwrap().handler, first);

        assert_eq!(registry.len(), 2);
        // the replacement inherits the earlier slot, so it still wins the tie
        assert_eq!(registry.lookup("GET", "/users/42").unwrap().descriptor.handler, second);
        assert_eq!(registry.lookup("GET", "/posts/42").unwrap().descriptor.handler, competitor);
        assert_eq!(registry.list()[0].handler, second);
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let registry = HandlerRegistry::new();
        let id = register(&registry, "post", "/items");
        assert_eq!(registry.lookup("POST", "/items").unwrap().descriptor.handler, id);
        assert_eq!(registry.lookup("post", "/items/").unwrap().descriptor.handler, id);
        assert!(registry.lookup("GET", "/items").is_none());
    }

    #[test]
    fn test_allowed_methods() {
        let registry = HandlerRegistry::new();
        register(&registry, "POST", "/items");
        register(&registry, "GET", "/items");
        register(&registry, "DELETE", "/items/:id");

        assert_eq!(registry.allowed_methods("/items"), vec!["GET", "POST"]);
        assert_eq!(registry.allowed_methods("/items/3"), vec!["DELETE"]);
        assert!(registry.allowed_methods("/nothing").is_empty());
    }

    #[test]
    fn test_delete() {
        let registry = HandlerRegistry::new();
        let id = register(&registry, "GET", "/users/:id");
        register(&registry, "GET", "/health");

        assert_eq!(registry.delete("GET", "/users/{id}").unwrap().handler, id);
        assert!(registry.delete("GET", "/users/:id").is_none());
        assert!(registry.delete("GET", "not-a-pattern").is_none());
        assert!(registry.delete("get", "/health").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_registrations() {
        let registry = HandlerRegistry::new();
        let err = registry
            .register("GET", "/a/:x/:x", HandlerId::next(), None)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = registry
            .register("GE T", "/a", HandlerId::next(), None)
            .unwrap_err();
        assert!(err.to_string().contains("invalid HTTP method"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_in_registration_order() {
        let registry = HandlerRegistry::new();
        register(&registry, "GET", "/b/:id");
        register(&registry, "GET", "/a");
        register(&registry, "POST", "/c");

        let paths: Vec<String> = registry.list().iter().map(|d| d.route_key()).collect();
        assert_eq!(paths, vec!["GET /b/:id", "GET /a", "POST /c"]);

        let info = registry.list()[0].info();
        assert_eq!(info.params, vec!["id"]);
    }

    #[test]
    fn test_clear() {
        let registry = HandlerRegistry::new();
        register(&registry, "GET", "/a");
        register(&registry, "POST", "/b/:id");

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(registry.lookup("POST", "/b/1").is_none());
        assert_eq!(registry.clear(), 0);
    }

    #[test]
    fn test_concurrent_lookups_during_registration() {
        let registry = Arc::new(HandlerRegistry::new());
        register(&registry, "GET", "/stable/:id");

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..500 {
                        let found = registry.lookup("GET", &format!("/stable/{i}"));
                        assert!(found.is_some());
                    }
                })
            })
            .collect();

        for i in 0..100 {
            register(&registry, "GET", &format!("/other/{i}/:x"));
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 101);
    }
}
