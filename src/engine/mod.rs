//! Execution engine: starts runs, resumes checkpoints, and hands out run
//! handles.
//!
//! Each engine instance owns its own run registry; multiple independent
//! engines can coexist in one process.

mod context;
mod routing;
mod superstep;

pub use context::WorkflowContext;

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::checkpoint_store::{CheckpointStore, CheckpointStoreError, InMemoryCheckpointStore};
use crate::event_log::EventLog;
use crate::request_broker::{RequestBroker, RequestError};
use crate::retry::RetryPolicy;
use crate::scoped_state::ScopedStateStore;
use crate::types::{
  CompatibilityMode, GENERIC_FAILURE_MESSAGE, RunStatus, SignatureMismatch, StructuralError,
  WorkflowEvent, WorkflowEventKind, WorkflowGraph,
};
use superstep::{ControlMsg, RunDriver};

/// Caller-visible engine errors. Executor and request errors are delivered as
/// events on the stream instead, so consumers always observe a terminal event
/// rather than an exception across the streaming boundary.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Structural(#[from] StructuralError),
  /// Raised by [Engine::resume] before any executor runs; never downgraded.
  #[error("incompatible checkpoint: {0}")]
  IncompatibleCheckpoint(#[from] SignatureMismatch),
  #[error("unknown checkpoint: {0}")]
  UnknownCheckpoint(String),
  #[error(transparent)]
  Store(#[from] CheckpointStoreError),
  #[error("run is no longer active: {0}")]
  RunNotActive(String),
}

/// Final disposition of a run, returned by [RunHandle::join].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
  Completed(Value),
  Failed(String),
  Cancelled(String),
  /// Halted at a superstep boundary; resumable through [Engine::resume].
  Suspended { checkpoint_id: String },
}

/// Engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
  /// Retry applied to executors without a per-executor override.
  pub default_retry: RetryPolicy,
  pub executor_retry: HashMap<String, RetryPolicy>,
  /// Timeout for human-in-the-loop requests; `None` waits indefinitely.
  pub request_timeout: Option<Duration>,
  /// Checkpoints kept per run, newest first; `None` keeps everything.
  pub checkpoint_retention: Option<usize>,
  /// Also checkpoint after every superstep, bounded by the retention above.
  pub checkpoint_every_superstep: bool,
  /// Signature comparison mode for [Engine::resume].
  pub compatibility: CompatibilityMode,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      default_retry: RetryPolicy::none(),
      executor_retry: HashMap::new(),
      request_timeout: None,
      checkpoint_retention: Some(16),
      checkpoint_every_superstep: false,
      compatibility: CompatibilityMode::Strict,
    }
  }
}

impl EngineConfig {
  pub(crate) fn retry_for(&self, executor_id: &str) -> RetryPolicy {
    self
      .executor_retry
      .get(executor_id)
      .cloned()
      .unwrap_or_else(|| self.default_retry.clone())
  }
}

/// State shared between a run's driver task, its handles, and its contexts.
pub(crate) struct RunShared {
  pub(crate) halt: AtomicBool,
  pub(crate) halt_notify: Notify,
  pub(crate) outcome: Mutex<Option<RunOutcome>>,
  pub(crate) log: Arc<EventLog>,
}

impl RunShared {
  fn new(log: Arc<EventLog>) -> Arc<Self> {
    Arc::new(Self {
      halt: AtomicBool::new(false),
      halt_notify: Notify::new(),
      outcome: Mutex::new(None),
      log,
    })
  }

  pub(crate) fn request_halt(&self) {
    if !self.halt.swap(true, Ordering::SeqCst) {
      self.log.append(WorkflowEventKind::HaltRequested);
      self.halt_notify.notify_waiters();
    }
  }
}

/// Shared-state fixture for context-level tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn test_shared() -> Arc<RunShared> {
  RunShared::new(Arc::new(EventLog::new()))
}

/// Handle to one in-flight (or finished) run.
#[derive(Clone)]
pub struct RunHandle {
  run_id: String,
  log: Arc<EventLog>,
  broker: Arc<RequestBroker>,
  shared: Arc<RunShared>,
  control: mpsc::UnboundedSender<ControlMsg>,
  cancel: CancellationToken,
  status: watch::Receiver<RunStatus>,
}

impl std::fmt::Debug for RunHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunHandle")
      .field("run_id", &self.run_id)
      .finish_non_exhaustive()
  }
}

impl RunHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn status(&self) -> RunStatus {
    *self.status.borrow()
  }

  /// Lazy stream of the run's events from the start: infinite until the
  /// terminal event, then finite. Restartable; every call replays the log.
  pub fn events(&self) -> impl futures::Stream<Item = WorkflowEvent> + Send + 'static {
    self.log.stream()
  }

  /// Lazy stream of events after the given sequence index (incremental mode).
  pub fn events_after(
    &self,
    after: Option<u64>,
  ) -> impl futures::Stream<Item = WorkflowEvent> + Send + 'static {
    self.log.stream_after(after)
  }

  /// Full replay of what the run has recorded so far.
  pub fn event_snapshot(&self) -> Vec<WorkflowEvent> {
    self.log.snapshot()
  }

  /// Resolves a pending human-in-the-loop request with response data.
  pub fn respond(&self, request_id: &str, data: Value) -> Result<(), RequestError> {
    self.broker.handle_response(request_id, data)
  }

  /// Cancels a single pending request; the run keeps going.
  pub fn cancel_request(&self, request_id: &str) -> Result<(), RequestError> {
    self.broker.cancel(request_id)
  }

  /// Number of requests currently awaiting a response.
  pub fn outstanding_requests(&self) -> usize {
    self.broker.outstanding()
  }

  /// Asks the run to suspend with a checkpoint at the next superstep
  /// boundary.
  pub fn request_halt(&self) {
    self.shared.request_halt();
  }

  /// Cancels the run. Observed at superstep boundaries and suspension
  /// points; already-produced events are flushed and a cancelled terminal
  /// event is emitted.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// Captures a checkpoint at the next superstep boundary and returns its id.
  pub async fn checkpoint(&self) -> Result<String, EngineError> {
    let (reply, response) = oneshot::channel();
    self
      .control
      .send(ControlMsg::Checkpoint(reply))
      .map_err(|_| EngineError::RunNotActive(self.run_id.clone()))?;
    response
      .await
      .map_err(|_| EngineError::RunNotActive(self.run_id.clone()))?
  }

  /// Waits for the run to finish or suspend.
  pub async fn join(&self) -> RunOutcome {
    let mut status = self.status.clone();
    loop {
      let current = *status.borrow_and_update();
      if current.is_terminal() || current == RunStatus::Suspended {
        if let Some(outcome) = self
          .shared
          .outcome
          .lock()
          .expect("run outcome poisoned")
          .clone()
        {
          return outcome;
        }
      }
      if status.changed().await.is_err() {
        return self
          .shared
          .outcome
          .lock()
          .expect("run outcome poisoned")
          .clone()
          .unwrap_or_else(|| RunOutcome::Failed(GENERIC_FAILURE_MESSAGE.to_string()));
      }
    }
  }
}

/// The workflow execution engine. Owns a checkpoint store and a registry of
/// the runs it started.
pub struct Engine {
  config: EngineConfig,
  store: Arc<dyn CheckpointStore>,
  runs: Mutex<HashMap<String, RunHandle>>,
}

impl Engine {
  pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
    Self::with_config(store, EngineConfig::default())
  }

  pub fn with_config(store: Arc<dyn CheckpointStore>, config: EngineConfig) -> Self {
    Self {
      config,
      store,
      runs: Mutex::new(HashMap::new()),
    }
  }

  /// Engine over an in-memory checkpoint store.
  pub fn in_memory() -> Self {
    Self::new(Arc::new(InMemoryCheckpointStore::new()))
  }

  pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
    &self.store
  }

  /// Validates the graph and starts a run with the input delivered to the
  /// entry executor. Requires a tokio runtime.
  #[instrument(level = "trace", skip(self, graph, input))]
  pub fn start(&self, graph: Arc<WorkflowGraph>, input: Value) -> Result<RunHandle, EngineError> {
    graph.validate()?;
    let run_id = Uuid::new_v4().to_string();
    let log = Arc::new(EventLog::new());
    log.append(WorkflowEventKind::WorkflowStarted {
      run_id: run_id.clone(),
    });
    let deliveries = vec![(graph.entry().to_string(), input)];
    info!(run_id = %run_id, entry = graph.entry(), "starting run");
    Ok(self.spawn_run(
      graph,
      run_id,
      log,
      ScopedStateStore::new(),
      HashMap::new(),
      deliveries,
      HashSet::new(),
      0,
      Vec::new(),
    ))
  }

  /// Loads a checkpoint, verifies its signature against the graph, and
  /// continues the run from its last committed superstep. Fails with an
  /// incompatibility error before any executor runs.
  #[instrument(level = "trace", skip(self, graph))]
  pub fn resume(
    &self,
    checkpoint_id: &str,
    graph: Arc<WorkflowGraph>,
  ) -> Result<RunHandle, EngineError> {
    let checkpoint = self
      .store
      .load(checkpoint_id)?
      .ok_or_else(|| EngineError::UnknownCheckpoint(checkpoint_id.to_string()))?;
    graph.validate()?;
    checkpoint
      .graph_signature
      .compatible(&graph.signature(), &self.config.compatibility)?;

    let run_id = checkpoint.workflow_id.clone();
    let log = Arc::new(EventLog::preload(checkpoint.event_log));
    log.append(WorkflowEventKind::WorkflowResumed {
      run_id: run_id.clone(),
      checkpoint_id: checkpoint_id.to_string(),
    });
    info!(run_id = %run_id, checkpoint_id = %checkpoint_id, superstep = checkpoint.superstep, "resuming run");
    let handle = self.spawn_run(
      graph,
      run_id,
      log,
      ScopedStateStore::with_baseline(checkpoint.scoped_state),
      checkpoint.executor_outputs,
      checkpoint.pending_deliveries,
      checkpoint.fired_fan_ins.into_iter().collect(),
      checkpoint.superstep,
      checkpoint.pending_requests,
    );
    Ok(handle)
  }

  #[allow(clippy::too_many_arguments)]
  fn spawn_run(
    &self,
    graph: Arc<WorkflowGraph>,
    run_id: String,
    log: Arc<EventLog>,
    state: ScopedStateStore,
    outputs: HashMap<String, Value>,
    deliveries: Vec<(String, Value)>,
    fired_fan_ins: HashSet<usize>,
    superstep: u64,
    pending_requests: Vec<crate::types::PendingRequestSnapshot>,
  ) -> RunHandle {
    let signature = graph.signature();
    let (broker, resolutions) = RequestBroker::new();
    for pending in pending_requests {
      let _ = broker.open_at(
        pending.request_id,
        pending.executor_id,
        pending.data,
        pending.created_at,
        self.config.request_timeout,
      );
    }
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(RunStatus::Running);
    let cancel = CancellationToken::new();
    let shared = RunShared::new(Arc::clone(&log));

    let driver = RunDriver {
      graph,
      run_id: run_id.clone(),
      config: self.config.clone(),
      store: Arc::clone(&self.store),
      log: Arc::clone(&log),
      broker: Arc::clone(&broker),
      resolutions,
      control: control_rx,
      control_tx: control_tx.clone(),
      cancel: cancel.clone(),
      shared: Arc::clone(&shared),
      status: status_tx,
      state,
      outputs,
      deliveries,
      fired_fan_ins,
      superstep,
      signature,
      final_output: None,
    };
    tokio::spawn(driver.run());

    let handle = RunHandle {
      run_id: run_id.clone(),
      log,
      broker,
      shared,
      control: control_tx,
      cancel,
      status: status_rx,
    };
    self
      .runs
      .lock()
      .expect("run registry poisoned")
      .insert(run_id, handle.clone());
    handle
  }

  /// Handle for a run this engine started, if any.
  pub fn run(&self, run_id: &str) -> Option<RunHandle> {
    self
      .runs
      .lock()
      .expect("run registry poisoned")
      .get(run_id)
      .cloned()
  }

  /// Ids of every run this engine instance has started.
  pub fn runs(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .runs
      .lock()
      .expect("run registry poisoned")
      .keys()
      .cloned()
      .collect();
    ids.sort_unstable();
    ids
  }
}
