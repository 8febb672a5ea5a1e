//! Tests for checkpoint serialization.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;

use super::checkpoint::{Checkpoint, PendingRequestSnapshot};
use super::edge::Edge;
use super::executor::FnExecutor;
use super::workflow_event::{WorkflowEvent, WorkflowEventKind};
use super::workflow_graph::WorkflowGraph;

fn sample_checkpoint() -> Checkpoint {
  let graph = WorkflowGraph::builder()
    .add_executor(FnExecutor::map("a", |v| v))
    .add_executor(FnExecutor::map("b", |v| v))
    .add_edge(Edge::direct("a", "b"))
    .entry("a")
    .build()
    .expect("valid graph");
  let mut scope = HashMap::new();
  scope.insert("count".to_string(), json!(2));
  let mut scoped_state = HashMap::new();
  scoped_state.insert("run".to_string(), scope);
  let mut executor_outputs = HashMap::new();
  executor_outputs.insert("a".to_string(), json!("a-out"));
  Checkpoint {
    checkpoint_id: "cp-1".to_string(),
    workflow_id: "run-1".to_string(),
    created_at: Utc::now(),
    graph_signature: graph.signature(),
    superstep: 1,
    scoped_state,
    executor_outputs,
    pending_deliveries: vec![("b".to_string(), json!("a-out"))],
    fired_fan_ins: vec![0],
    event_log: vec![WorkflowEvent::new(
      0,
      WorkflowEventKind::WorkflowStarted {
        run_id: "run-1".to_string(),
      },
    )],
    pending_requests: vec![PendingRequestSnapshot {
      request_id: "req-1".to_string(),
      executor_id: "a".to_string(),
      data: json!({"ask": "name"}),
      created_at: Utc::now(),
    }],
    halt_requested: true,
  }
}

#[test]
fn checkpoint_roundtrips_value_equal() {
  let checkpoint = sample_checkpoint();
  let encoded = serde_json::to_string_pretty(&checkpoint).expect("serialize");
  let decoded: Checkpoint = serde_json::from_str(&encoded).expect("deserialize");
  assert_eq!(checkpoint, decoded);
  assert_eq!(decoded.graph_signature, checkpoint.graph_signature);
  assert_eq!(decoded.scoped_state, checkpoint.scoped_state);
  assert_eq!(decoded.event_log, checkpoint.event_log);
}

#[test]
fn clone_is_independent() {
  let checkpoint = sample_checkpoint();
  let mut copy = checkpoint.clone();
  copy
    .scoped_state
    .get_mut("run")
    .expect("scope")
    .insert("count".to_string(), json!(99));
  assert_eq!(checkpoint.scoped_state["run"]["count"], json!(2));
}
