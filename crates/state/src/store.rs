//! [`StateStore`]: the global/scope-stacked variable store a running flow
//! reads and writes through.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use loomflow_error::StateError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{get_path, set_path};

/// Per-variable bookkeeping, independent of its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMeta {
    /// When this name was first written, at any scope depth.
    pub created_at: DateTime<Utc>,
    /// When this name was last written.
    pub updated_at: DateTime<Utc>,
    /// How many times this name has been written, across all scopes.
    pub write_count: u64,
}

impl VariableMeta {
    fn created(now: DateTime<Utc>) -> Self {
        Self { created_at: now, updated_at: now, write_count: 1 }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.write_count += 1;
    }
}

/// A serializable point-in-time copy of a [`StateStore`], used by the
/// persistence pipeline's suspend/resume cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    global: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    meta: HashMap<String, VariableMeta>,
}

/// The variable store a flow execution reads and writes through.
///
/// Names live in a global map plus a stack of nested scopes (pushed on
/// entry to a loop body or parallel branch, popped on exit). Reads check
/// scopes innermost-first, falling back to the global map; writes always
/// target the innermost open scope, or the global map when no scope is
/// open.
///
/// Computed-variable thunks (a variable whose value is a closure evaluated
/// lazily) are intentionally not modeled here: they cannot be serialized,
/// so a flow that suspends mid-execution loses them on resume. Host
/// programs that need lazy variables must re-register them after
/// `resume`.
#[derive(Debug, Default)]
pub struct StateStore {
    global: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    meta: HashMap<String, VariableMeta>,
}

impl StateStore {
    /// An empty store with no open scopes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new, empty scope. Writes target this scope until it is
    /// popped.
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pop the innermost scope, discarding any variables written only
    /// within it. Errors if no scope is open.
    pub fn pop_scope(&mut self) -> Result<(), StateError> {
        if self.scopes.pop().is_none() {
            return Err(StateError("cannot pop scope: scope stack is empty".into()));
        }
        Ok(())
    }

    /// Current scope nesting depth.
    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Set a variable's full value in the innermost open scope, or the
    /// global map when no scope is open.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.set_at(Utc::now(), name, value);
    }

    fn set_at(&mut self, now: DateTime<Utc>, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.meta.get_mut(&name) {
            Some(meta) => meta.touch(now),
            None => {
                self.meta.insert(name.clone(), VariableMeta::created(now));
            }
        }
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name, value);
            }
            None => {
                self.global.insert(name, value);
            }
        }
    }

    /// Get a variable's full value, searching scopes innermost-first and
    /// falling back to the global map.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Some(value);
            }
        }
        self.global.get(name)
    }

    /// Get a projection of a variable by dotted path.
    #[must_use]
    pub fn get_path(&self, name: &str, path: &str) -> Option<&Value> {
        get_path(self.get(name)?, path)
    }

    /// Set a projection of a variable by dotted path, cloning the variable
    /// (and every container along the path) rather than mutating in place.
    /// If the variable does not yet exist, it is created as an empty
    /// object before the path is applied.
    pub fn set_path(&mut self, name: &str, path: &str, value: Value) -> Result<(), StateError> {
        let current = self.get(name).cloned().unwrap_or(Value::Object(serde_json::Map::new()));
        let updated = set_path(&current, path, value).map_err(StateError)?;
        self.set(name.to_owned(), updated);
        Ok(())
    }

    /// This variable's bookkeeping, if it has ever been written.
    #[must_use]
    pub fn meta(&self, name: &str) -> Option<&VariableMeta> {
        self.meta.get(name)
    }

    /// A flattened view of every visible name: global names overlaid by
    /// each open scope, innermost last (so innermost wins on conflict).
    #[must_use]
    pub fn get_all(&self) -> HashMap<String, Value> {
        let mut flattened = self.global.clone();
        for scope in &self.scopes {
            flattened.extend(scope.clone());
        }
        flattened
    }

    /// Capture a serializable copy of the entire store (global, scopes,
    /// and per-variable metadata) for persistence.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot { global: self.global.clone(), scopes: self.scopes.clone(), meta: self.meta.clone() }
    }

    /// Replace this store's contents with a previously captured snapshot.
    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.global = snapshot.global;
        self.scopes = snapshot.scopes;
        self.meta = snapshot.meta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_get_global_variable() {
        let mut store = StateStore::new();
        store.set("count", json!(1));
        assert_eq!(store.get("count"), Some(&json!(1)));
    }

    #[test]
    fn scoped_write_shadows_global_and_is_discarded_on_pop() {
        let mut store = StateStore::new();
        store.set("x", json!("global"));
        store.push_scope();
        store.set("x", json!("scoped"));
        assert_eq!(store.get("x"), Some(&json!("scoped")));
        store.pop_scope().unwrap();
        assert_eq!(store.get("x"), Some(&json!("global")));
    }

    #[test]
    fn pop_scope_without_push_is_an_error() {
        let mut store = StateStore::new();
        assert!(store.pop_scope().is_err());
    }

    #[test]
    fn get_path_projects_into_a_variable() {
        let mut store = StateStore::new();
        store.set("user", json!({"address": {"city": "Kyiv"}}));
        assert_eq!(store.get_path("user", "address.city"), Some(&json!("Kyiv")));
    }

    #[test]
    fn set_path_creates_missing_variable_as_object() {
        let mut store = StateStore::new();
        store.set_path("user", "name", json!("Ada")).unwrap();
        assert_eq!(store.get("user"), Some(&json!({"name": "Ada"})));
    }

    #[test]
    fn get_all_overlays_scopes_over_global() {
        let mut store = StateStore::new();
        store.set("a", json!(1));
        store.push_scope();
        store.set("b", json!(2));
        let all = store.get_all();
        assert_eq!(all.get("a"), Some(&json!(1)));
        assert_eq!(all.get("b"), Some(&json!(2)));
    }

    #[test]
    fn meta_tracks_write_count() {
        let mut store = StateStore::new();
        store.set("a", json!(1));
        store.set("a", json!(2));
        assert_eq!(store.meta("a").unwrap().write_count, 2);
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut store = StateStore::new();
        store.set("a", json!(1));
        store.push_scope();
        store.set("b", json!(2));
        let snapshot = store.snapshot();

        let mut restored = StateStore::new();
        restored.restore(snapshot);
        assert_eq!(restored.get("a"), Some(&json!(1)));
        assert_eq!(restored.get("b"), Some(&json!(2)));
        assert_eq!(restored.scope_depth(), 1);
    }
}
