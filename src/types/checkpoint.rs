//! Checkpoint: immutable, durable snapshot of a run sufficient to resume it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::{GraphSignature, WorkflowEvent};

/// A request that was outstanding when the checkpoint was captured. Resume
/// re-registers it with the broker (timeouts restart fresh).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequestSnapshot {
  pub request_id: String,
  pub executor_id: String,
  pub data: Value,
  pub created_at: DateTime<Utc>,
}

/// Captured at a suspend boundary; immutable once written. Later checkpoints
/// supersede earlier ones, they never mutate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub checkpoint_id: String,
  /// The run this checkpoint belongs to.
  pub workflow_id: String,
  pub created_at: DateTime<Utc>,
  pub graph_signature: GraphSignature,
  /// Supersteps committed before the snapshot.
  pub superstep: u64,
  /// Merged scoped-state baseline: scope -> key -> value.
  pub scoped_state: HashMap<String, HashMap<String, Value>>,
  /// Latest output per executor; fan-in lookups resume from here.
  pub executor_outputs: HashMap<String, Value>,
  /// Inputs already routed but not yet executed.
  pub pending_deliveries: Vec<(String, Value)>,
  /// Fan-in edges (by index) that already fired.
  pub fired_fan_ins: Vec<usize>,
  pub event_log: Vec<WorkflowEvent>,
  pub pending_requests: Vec<PendingRequestSnapshot>,
  pub halt_requested: bool,
}
