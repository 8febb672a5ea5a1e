//! Tests for checkpoint persistence and deep-copy semantics.

use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::collections::HashMap;

use crate::checkpoint_store::{CheckpointStore, FsCheckpointStore, InMemoryCheckpointStore};
use crate::types::{Checkpoint, Edge, FnExecutor, WorkflowEvent, WorkflowEventKind, WorkflowGraph};

fn checkpoint(id: &str, workflow_id: &str, age_seconds: i64) -> Checkpoint {
  let graph = WorkflowGraph::builder()
    .add_executor(FnExecutor::map("a", |v| v))
    .add_executor(FnExecutor::map("b", |v| v))
    .add_edge(Edge::direct("a", "b"))
    .entry("a")
    .build()
    .expect("valid graph");
  let mut scope = HashMap::new();
  scope.insert("k".to_string(), json!("v"));
  let mut scoped_state = HashMap::new();
  scoped_state.insert("run".to_string(), scope);
  Checkpoint {
    checkpoint_id: id.to_string(),
    workflow_id: workflow_id.to_string(),
    created_at: Utc::now() - TimeDelta::seconds(age_seconds),
    graph_signature: graph.signature(),
    superstep: 1,
    scoped_state,
    executor_outputs: HashMap::new(),
    pending_deliveries: Vec::new(),
    fired_fan_ins: Vec::new(),
    event_log: vec![WorkflowEvent::new(
      0,
      WorkflowEventKind::WorkflowStarted {
        run_id: workflow_id.to_string(),
      },
    )],
    pending_requests: Vec::new(),
    halt_requested: false,
  }
}

#[test]
fn in_memory_roundtrip_is_value_equal() {
  let store = InMemoryCheckpointStore::new();
  let original = checkpoint("cp-1", "run-1", 0);
  store.save(&original).expect("save");
  let loaded = store.load("cp-1").expect("load").expect("present");
  assert_eq!(loaded, original);
  assert_eq!(store.load("missing").expect("load"), None);
}

#[test]
fn in_memory_mutating_a_load_never_corrupts_stored_state() {
  let store = InMemoryCheckpointStore::new();
  let original = checkpoint("cp-1", "run-1", 0);
  store.save(&original).expect("save");

  let mut first = store.load("cp-1").expect("load").expect("present");
  first
    .scoped_state
    .get_mut("run")
    .expect("scope")
    .insert("k".to_string(), json!("mutated"));
  first.event_log.clear();

  let second = store.load("cp-1").expect("load").expect("present");
  assert_eq!(second, original);
}

#[test]
fn in_memory_list_is_newest_first_per_workflow() {
  let store = InMemoryCheckpointStore::new();
  store.save(&checkpoint("cp-old", "run-1", 30)).expect("save");
  store.save(&checkpoint("cp-new", "run-1", 0)).expect("save");
  store.save(&checkpoint("cp-mid", "run-1", 15)).expect("save");
  store.save(&checkpoint("cp-other", "run-2", 0)).expect("save");
  assert_eq!(
    store.list("run-1").expect("list"),
    vec!["cp-new".to_string(), "cp-mid".to_string(), "cp-old".to_string()]
  );
}

#[test]
fn in_memory_delete_removes_only_that_checkpoint() {
  let store = InMemoryCheckpointStore::new();
  store.save(&checkpoint("cp-1", "run-1", 10)).expect("save");
  store.save(&checkpoint("cp-2", "run-1", 0)).expect("save");
  store.delete("cp-1").expect("delete");
  assert_eq!(store.load("cp-1").expect("load"), None);
  assert_eq!(store.list("run-1").expect("list"), vec!["cp-2".to_string()]);
  // Deleting a missing id is a no-op.
  store.delete("cp-1").expect("idempotent delete");
}

#[test]
fn fs_store_roundtrips_through_json_files() {
  let dir = tempfile::tempdir().expect("tempdir");
  let store = FsCheckpointStore::new(dir.path().join("checkpoints"));
  let original = checkpoint("cp-1", "run-1", 0);
  store.save(&original).expect("save");
  let loaded = store.load("cp-1").expect("load").expect("present");
  assert_eq!(loaded, original);
  assert!(dir.path().join("checkpoints").join("cp-1.json").exists());
}

#[test]
fn fs_store_load_missing_is_absent_not_error() {
  let dir = tempfile::tempdir().expect("tempdir");
  let store = FsCheckpointStore::new(dir.path());
  assert_eq!(store.load("nope").expect("load"), None);
  assert!(store.list("run-1").expect("list").is_empty());
}

#[test]
fn fs_store_list_is_newest_first_and_delete_works() {
  let dir = tempfile::tempdir().expect("tempdir");
  let store = FsCheckpointStore::new(dir.path());
  store.save(&checkpoint("cp-old", "run-1", 30)).expect("save");
  store.save(&checkpoint("cp-new", "run-1", 0)).expect("save");
  store.save(&checkpoint("cp-other", "run-2", 5)).expect("save");
  assert_eq!(
    store.list("run-1").expect("list"),
    vec!["cp-new".to_string(), "cp-old".to_string()]
  );
  store.delete("cp-new").expect("delete");
  assert_eq!(store.list("run-1").expect("list"), vec!["cp-old".to_string()]);
}
