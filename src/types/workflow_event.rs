//! Workflow events: the append-only, monotonically sequenced run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal failure message used when no structured detail is available.
pub const GENERIC_FAILURE_MESSAGE: &str = "workflow failed without further detail";

/// One entry in a run's event log. Sequence indices are strictly increasing
/// within a run and never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
  pub sequence: u64,
  pub timestamp: DateTime<Utc>,
  pub kind: WorkflowEventKind,
}

impl WorkflowEvent {
  pub fn new(sequence: u64, kind: WorkflowEventKind) -> Self {
    Self {
      sequence,
      timestamp: Utc::now(),
      kind,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.kind.is_terminal()
  }
}

/// Closed set of event shapes a run can record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEventKind {
  WorkflowStarted {
    run_id: String,
  },
  /// A resumed run continuing from a checkpoint.
  WorkflowResumed {
    run_id: String,
    checkpoint_id: String,
  },
  SuperstepCompleted {
    superstep: u64,
  },
  ExecutorInvoked {
    executor_id: String,
  },
  ExecutorCompleted {
    executor_id: String,
    output: Value,
  },
  /// Progress payload queued through the context, flushed at the superstep
  /// boundary.
  ExecutorProgress {
    executor_id: String,
    payload: Value,
  },
  ExecutorFailed {
    executor_id: String,
    kind: String,
    message: String,
  },
  RequestPending {
    request_id: String,
    executor_id: String,
    data: Value,
  },
  RequestResolved {
    request_id: String,
  },
  RequestTimedOut {
    request_id: String,
  },
  RequestCancelled {
    request_id: String,
  },
  HaltRequested,
  CheckpointCreated {
    checkpoint_id: String,
  },
  /// Terminal: run finished; wraps the extracted output.
  WorkflowCompleted {
    output: Value,
  },
  /// Terminal: an executor-raised failure aborted the run.
  WorkflowFailed {
    message: String,
  },
  /// Terminal: the run was cancelled or terminated externally. Distinct from
  /// [WorkflowEventKind::WorkflowFailed].
  WorkflowCancelled {
    message: String,
  },
}

impl WorkflowEventKind {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      WorkflowEventKind::WorkflowCompleted { .. }
        | WorkflowEventKind::WorkflowFailed { .. }
        | WorkflowEventKind::WorkflowCancelled { .. }
    )
  }
}
