//! Per-executor capability handle passed into `Executor::execute`.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::RunShared;
use crate::scoped_state::{ScopedStateStore, StateKeyError, StateOp};

/// Effects an executor queued during one invocation, merged into the run at
/// the superstep barrier.
#[derive(Debug, Default)]
pub(crate) struct ContextEffects {
  pub state_ops: Vec<StateOp>,
  pub progress: Vec<Value>,
}

/// Capability handle scoped to one executor invocation.
///
/// State reads see the superstep-start committed view plus this executor's
/// own queued writes; writes from sibling executors in the same superstep are
/// never visible. Queued writes and progress events land at the barrier.
pub struct WorkflowContext {
  run_id: String,
  executor_id: String,
  superstep: u64,
  state: Mutex<ScopedStateStore>,
  progress: Mutex<Vec<Value>>,
  shared: Arc<RunShared>,
}

impl WorkflowContext {
  pub(crate) fn new(
    run_id: String,
    executor_id: String,
    superstep: u64,
    baseline: HashMap<String, HashMap<String, Value>>,
    shared: Arc<RunShared>,
  ) -> Self {
    Self {
      run_id,
      executor_id,
      superstep,
      state: Mutex::new(ScopedStateStore::with_baseline(baseline)),
      progress: Mutex::new(Vec::new()),
      shared,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn executor_id(&self) -> &str {
    &self.executor_id
  }

  /// Superstep this invocation runs in.
  pub fn superstep(&self) -> u64 {
    self.superstep
  }

  pub fn read_state(&self, scope: &str, key: &str) -> Result<Option<Value>, StateKeyError> {
    self.state.lock().expect("context state poisoned").read(scope, key)
  }

  /// Queues a write; visible to this executor immediately, to the rest of the
  /// graph after the superstep boundary.
  pub fn write_state(&self, scope: &str, key: &str, value: Value) -> Result<(), StateKeyError> {
    self
      .state
      .lock()
      .expect("context state poisoned")
      .write(scope, key, value)
  }

  pub fn delete_state(&self, scope: &str, key: &str) -> Result<(), StateKeyError> {
    self
      .state
      .lock()
      .expect("context state poisoned")
      .delete(scope, key)
  }

  pub fn clear_scope(&self, scope: &str) -> Result<(), StateKeyError> {
    self
      .state
      .lock()
      .expect("context state poisoned")
      .clear_scope(scope)
  }

  pub fn state_keys(&self, scope: &str) -> Result<Vec<String>, StateKeyError> {
    self.state.lock().expect("context state poisoned").keys(scope)
  }

  /// Returns the existing value or initializes it through `factory`; the
  /// factory runs at most once before the next commit.
  pub fn read_or_init(
    &self,
    scope: &str,
    key: &str,
    factory: impl FnOnce() -> Value,
  ) -> Result<Value, StateKeyError> {
    self
      .state
      .lock()
      .expect("context state poisoned")
      .read_or_init(scope, key, factory)
  }

  /// Queues a progress payload, flushed as an `ExecutorProgress` event at the
  /// superstep boundary.
  pub fn queue_progress(&self, payload: Value) {
    self
      .progress
      .lock()
      .expect("context progress poisoned")
      .push(payload);
  }

  /// Asks the run to suspend at the next superstep boundary. Emits the
  /// halt-requested event once, no matter how often it is called.
  pub fn request_halt(&self) {
    self.shared.request_halt();
  }

  pub(crate) fn into_effects(self) -> ContextEffects {
    ContextEffects {
      state_ops: self
        .state
        .into_inner()
        .expect("context state poisoned")
        .take_ops(),
      progress: self.progress.into_inner().expect("context progress poisoned"),
    }
  }
}
