//! Tests for signature determinism and compatibility checks.

use proptest::prelude::*;
use serde_json::json;

use super::edge::Edge;
use super::executor::FnExecutor;
use super::graph_signature::{CompatibilityMode, GraphSignature, SignatureChange};
use super::workflow_graph::WorkflowGraph;

fn exec(id: &str) -> FnExecutor {
  FnExecutor::map(id, |v| v)
}

fn linear_graph() -> WorkflowGraph {
  WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_edge(Edge::direct("a", "b"))
    .entry("a")
    .build()
    .expect("valid graph")
}

#[test]
fn signature_is_deterministic() {
  let graph = linear_graph();
  assert_eq!(graph.signature(), graph.signature());
}

#[test]
fn construction_order_does_not_change_the_hash() {
  let forward = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_executor(exec("c"))
    .add_edge(Edge::direct("a", "b"))
    .add_edge(Edge::direct("b", "c"))
    .entry("a")
    .build()
    .expect("valid graph");
  let reversed = WorkflowGraph::builder()
    .add_executor(exec("c"))
    .add_executor(exec("b"))
    .add_executor(exec("a"))
    .add_edge(Edge::direct("b", "c"))
    .add_edge(Edge::direct("a", "b"))
    .entry("a")
    .build()
    .expect("valid graph");
  assert_eq!(forward.signature().hash, reversed.signature().hash);
}

#[test]
fn adding_an_executor_changes_the_hash() {
  let base = linear_graph();
  let larger = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_executor(exec("c"))
    .add_edge(Edge::direct("a", "b"))
    .add_edge(Edge::direct("b", "c"))
    .entry("a")
    .build()
    .expect("valid graph");
  assert_ne!(base.signature().hash, larger.signature().hash);
}

#[test]
fn changing_a_type_signature_changes_only_the_executor_component() {
  let base = linear_graph();
  let retyped = WorkflowGraph::builder()
    .add_executor(exec("a").with_signatures("TypedIn", "TypedOut"))
    .add_executor(exec("b"))
    .add_edge(Edge::direct("a", "b"))
    .entry("a")
    .build()
    .expect("valid graph");
  let s1 = base.signature();
  let s2 = retyped.signature();
  assert_ne!(s1.hash, s2.hash);
  assert_ne!(s1.executors_hash, s2.executors_hash);
  assert_eq!(s1.edges_hash, s2.edges_hash);
  assert_eq!(s1.entry_hash, s2.entry_hash);
}

#[test]
fn fan_out_argument_order_is_structural() {
  let build = |targets: [&str; 2]| {
    WorkflowGraph::builder()
      .add_executor(exec("a"))
      .add_executor(exec("b"))
      .add_executor(exec("c"))
      .add_executor(exec("d"))
      .add_edge(Edge::fan_out("a", targets))
      .add_edge(Edge::fan_in(["b", "c"], "d", |outputs| json!(outputs)))
      .entry("a")
      .build()
      .expect("valid graph")
  };
  assert_ne!(
    build(["b", "c"]).signature().hash,
    build(["c", "b"]).signature().hash
  );
}

#[test]
fn diff_reports_executor_added() {
  let base = linear_graph().signature();
  let larger = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_executor(exec("c"))
    .add_edge(Edge::direct("a", "b"))
    .add_edge(Edge::direct("b", "c"))
    .entry("a")
    .build()
    .expect("valid graph")
    .signature();
  let changes = base.diff(&larger);
  assert!(changes.contains(&SignatureChange::ExecutorAdded));
  assert!(changes.contains(&SignatureChange::EdgeAdded));
}

#[test]
fn diff_reports_entry_changed() {
  let a_entry = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_edge(Edge::direct("a", "b"))
    .entry("a")
    .build()
    .expect("valid graph")
    .signature();
  // Same executors, reversed edge so "b" is a valid entry.
  let b_entry = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_edge(Edge::direct("b", "a"))
    .entry("b")
    .build()
    .expect("valid graph")
    .signature();
  let changes = a_entry.diff(&b_entry);
  assert!(changes.contains(&SignatureChange::EntryChanged));
}

#[test]
fn compatible_strict_requires_byte_equality() {
  let base = linear_graph().signature();
  assert!(base.compatible(&base, &CompatibilityMode::Strict).is_ok());

  let other = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_executor(exec("c"))
    .add_edge(Edge::direct("a", "b"))
    .add_edge(Edge::direct("b", "c"))
    .entry("a")
    .build()
    .expect("valid graph")
    .signature();
  let mismatch = base
    .compatible(&other, &CompatibilityMode::Strict)
    .expect_err("strict mismatch");
  assert!(!mismatch.description.is_empty());
  assert!(!mismatch.changes.is_empty());
}

#[test]
fn allow_list_tolerates_only_listed_changes() {
  let base = linear_graph().signature();
  let larger = WorkflowGraph::builder()
    .add_executor(exec("a"))
    .add_executor(exec("b"))
    .add_executor(exec("c"))
    .add_edge(Edge::direct("a", "b"))
    .add_edge(Edge::direct("b", "c"))
    .entry("a")
    .build()
    .expect("valid graph")
    .signature();
  let tolerant = CompatibilityMode::AllowList(vec![
    SignatureChange::ExecutorAdded,
    SignatureChange::EdgeAdded,
  ]);
  assert!(base.compatible(&larger, &tolerant).is_ok());

  let narrow = CompatibilityMode::AllowList(vec![SignatureChange::ExecutorAdded]);
  assert!(base.compatible(&larger, &narrow).is_err());
}

#[test]
fn serde_roundtrip_preserves_signature() {
  let signature = linear_graph().signature();
  let json = serde_json::to_string(&signature).expect("serialize");
  let back: GraphSignature = serde_json::from_str(&json).expect("deserialize");
  assert_eq!(signature, back);
}

proptest! {
  /// Chains with arbitrary extra forward edges hash identically no matter the
  /// construction order.
  #[test]
  fn prop_signature_ignores_construction_order(
    len in 2usize..7,
    extra in proptest::collection::vec((0usize..6, 0usize..6), 0..5),
  ) {
    let ids: Vec<String> = (0..len).map(|i| format!("e{}", i)).collect();
    let mut edges = Vec::new();
    for window in ids.windows(2) {
      edges.push((window[0].clone(), window[1].clone()));
    }
    for (from, to) in extra {
      // Forward-only extras keep the graph acyclic.
      if from < to && to < len {
        edges.push((ids[from].clone(), ids[to].clone()));
      }
    }

    let mut forward = WorkflowGraph::builder();
    for id in &ids {
      forward = forward.add_executor(exec(id));
    }
    for (from, to) in &edges {
      forward = forward.add_edge(Edge::direct(from.as_str(), to.as_str()));
    }
    let forward = forward.entry(ids[0].clone()).build().expect("valid graph");

    let mut reversed = WorkflowGraph::builder();
    for id in ids.iter().rev() {
      reversed = reversed.add_executor(exec(id));
    }
    for (from, to) in edges.iter().rev() {
      reversed = reversed.add_edge(Edge::direct(from.as_str(), to.as_str()));
    }
    let reversed = reversed.entry(ids[0].clone()).build().expect("valid graph");

    prop_assert_eq!(forward.signature().hash, reversed.signature().hash);
  }
}
