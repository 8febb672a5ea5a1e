//! Scoped state store: a pending-write overlay over a persisted baseline.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Programmer errors only. A missing value is a normal `None` read result,
/// never an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateKeyError {
  #[error("state scope must not be empty")]
  EmptyScope,
  #[error("state key must not be empty")]
  EmptyKey,
}

/// One queued state mutation. Ops recorded by an executor's private overlay
/// are replayed onto the run store at the superstep barrier.
#[derive(Debug, Clone, PartialEq)]
pub enum StateOp {
  Set {
    scope: String,
    key: String,
    value: Value,
  },
  Delete {
    scope: String,
    key: String,
  },
  ClearScope {
    scope: String,
  },
}

/// Overlay of pending writes over a previously-persisted baseline,
/// partitioned into named scopes.
///
/// Read priority: local deletion marker, then local pending write, then the
/// cleared-scope mask, then the baseline snapshot, then absent.
#[derive(Debug, Clone, Default)]
pub struct ScopedStateStore {
  baseline: HashMap<String, HashMap<String, Value>>,
  /// `None` is a deletion marker.
  pending: HashMap<(String, String), Option<Value>>,
  /// Scopes whose baseline reads are masked until new writes land.
  cleared: HashSet<String>,
  /// Insertion-ordered journal of every mutation since the last snapshot.
  ops: Vec<StateOp>,
}

fn check(scope: &str, key: &str) -> Result<(), StateKeyError> {
  if scope.is_empty() {
    return Err(StateKeyError::EmptyScope);
  }
  if key.is_empty() {
    return Err(StateKeyError::EmptyKey);
  }
  Ok(())
}

impl ScopedStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_baseline(baseline: HashMap<String, HashMap<String, Value>>) -> Self {
    Self {
      baseline,
      ..Self::default()
    }
  }

  pub fn read(&self, scope: &str, key: &str) -> Result<Option<Value>, StateKeyError> {
    check(scope, key)?;
    if let Some(pending) = self.pending.get(&(scope.to_string(), key.to_string())) {
      return Ok(pending.clone());
    }
    if self.cleared.contains(scope) {
      return Ok(None);
    }
    Ok(self.baseline.get(scope).and_then(|s| s.get(key)).cloned())
  }

  pub fn write(&mut self, scope: &str, key: &str, value: Value) -> Result<(), StateKeyError> {
    check(scope, key)?;
    self.apply_op(StateOp::Set {
      scope: scope.to_string(),
      key: key.to_string(),
      value,
    });
    Ok(())
  }

  pub fn delete(&mut self, scope: &str, key: &str) -> Result<(), StateKeyError> {
    check(scope, key)?;
    self.apply_op(StateOp::Delete {
      scope: scope.to_string(),
      key: key.to_string(),
    });
    Ok(())
  }

  /// Removes every pending write for the scope and masks its baseline until
  /// new writes occur. Other scopes are untouched.
  pub fn clear_scope(&mut self, scope: &str) -> Result<(), StateKeyError> {
    if scope.is_empty() {
      return Err(StateKeyError::EmptyScope);
    }
    self.apply_op(StateOp::ClearScope {
      scope: scope.to_string(),
    });
    Ok(())
  }

  /// Returns the existing value, or invokes `factory`, queues its result as a
  /// write, and returns it. The queued write guarantees `factory` does not run
  /// again on a second read before the next commit.
  pub fn read_or_init(
    &mut self,
    scope: &str,
    key: &str,
    factory: impl FnOnce() -> Value,
  ) -> Result<Value, StateKeyError> {
    if let Some(existing) = self.read(scope, key)? {
      return Ok(existing);
    }
    let value = factory();
    self.write(scope, key, value.clone())?;
    Ok(value)
  }

  /// Sorted keys visible in the scope through the overlay.
  pub fn keys(&self, scope: &str) -> Result<Vec<String>, StateKeyError> {
    if scope.is_empty() {
      return Err(StateKeyError::EmptyScope);
    }
    let mut keys: HashSet<&str> = HashSet::new();
    if !self.cleared.contains(scope) {
      if let Some(entries) = self.baseline.get(scope) {
        keys.extend(entries.keys().map(String::as_str));
      }
    }
    for ((s, k), pending) in &self.pending {
      if s != scope {
        continue;
      }
      match pending {
        Some(_) => {
          keys.insert(k.as_str());
        }
        None => {
          keys.remove(k.as_str());
        }
      }
    }
    let mut keys: Vec<String> = keys.into_iter().map(String::from).collect();
    keys.sort_unstable();
    Ok(keys)
  }

  fn apply_op(&mut self, op: StateOp) {
    match &op {
      StateOp::Set { scope, key, value } => {
        self
          .pending
          .insert((scope.clone(), key.clone()), Some(value.clone()));
      }
      StateOp::Delete { scope, key } => {
        self.pending.insert((scope.clone(), key.clone()), None);
      }
      StateOp::ClearScope { scope } => {
        self.pending.retain(|(s, _), _| s != scope);
        self.cleared.insert(scope.clone());
      }
    }
    self.ops.push(op);
  }

  /// Replays a journal of mutations, preserving order. Used at superstep
  /// barriers to merge an executor's private overlay into the run store.
  pub fn apply(&mut self, ops: Vec<StateOp>) {
    for op in ops {
      self.apply_op(op);
    }
  }

  /// Drains the mutation journal accumulated since the last snapshot.
  pub fn take_ops(&mut self) -> Vec<StateOp> {
    std::mem::take(&mut self.ops)
  }

  pub fn has_pending(&self) -> bool {
    !self.pending.is_empty() || !self.cleared.is_empty()
  }

  /// Baseline with the overlay applied, without committing.
  pub fn merged_view(&self) -> HashMap<String, HashMap<String, Value>> {
    let mut merged = self.baseline.clone();
    for scope in &self.cleared {
      merged.remove(scope);
    }
    for ((scope, key), pending) in &self.pending {
      match pending {
        Some(value) => {
          merged
            .entry(scope.clone())
            .or_default()
            .insert(key.clone(), value.clone());
        }
        None => {
          if let Some(entries) = merged.get_mut(scope) {
            entries.remove(key);
          }
        }
      }
    }
    merged.retain(|_, entries| !entries.is_empty());
    merged
  }

  /// Commits the merged view as the new baseline, clears the overlay, and
  /// returns the committed state. Checkpoint creation captures this.
  pub fn snapshot(&mut self) -> HashMap<String, HashMap<String, Value>> {
    let merged = self.merged_view();
    self.baseline = merged.clone();
    self.pending.clear();
    self.cleared.clear();
    self.ops.clear();
    merged
  }

  pub fn baseline(&self) -> &HashMap<String, HashMap<String, Value>> {
    &self.baseline
  }
}
