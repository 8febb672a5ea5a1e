//! Tests for [Edge] construction, canonical forms, and callable wrappers.

use futures::executor::block_on;
use serde_json::json;

use super::edge::{Edge, merge_fn, predicate_fn, selector_fn};

#[test]
fn direct_canonical_form() {
  let edge = Edge::direct("a", "b");
  assert_eq!(edge.canonical(), "direct:a->b");
  assert_eq!(edge.kind(), "direct");
  assert_eq!(edge.sources(), vec!["a"]);
  assert_eq!(edge.targets(), vec!["b"]);
}

#[test]
fn conditional_canonical_includes_both_branches() {
  let edge = Edge::conditional("a", "b", Some("c".to_string()), |_| true);
  assert_eq!(edge.canonical(), "conditional:a->b|c");
  assert_eq!(edge.targets(), vec!["b", "c"]);

  let no_false = Edge::conditional("a", "b", None, |_| true);
  assert_eq!(no_false.canonical(), "conditional:a->b|-");
  assert_eq!(no_false.targets(), vec!["b"]);
}

#[test]
fn fan_out_preserves_target_order() {
  let edge = Edge::fan_out("a", ["b", "c"]);
  assert_eq!(edge.canonical(), "fan_out:a->[b,c]");
  let flipped = Edge::fan_out("a", ["c", "b"]);
  assert_ne!(edge.canonical(), flipped.canonical());
}

#[test]
fn fan_in_preserves_source_order() {
  let edge = Edge::fan_in(["b", "c"], "d", |outputs| json!(outputs));
  assert_eq!(edge.canonical(), "fan_in:[b,c]->d");
  assert_eq!(edge.sources(), vec!["b", "c"]);
  assert_eq!(edge.targets(), vec!["d"]);
}

#[test]
fn switch_case_canonical_keeps_case_order_and_default() {
  let edge = Edge::switch_case(
    "a",
    vec![("one", "b"), ("two", "c")],
    Some("d".to_string()),
    |_| "one".to_string(),
  );
  assert_eq!(edge.canonical(), "switch_case:a->{one:b,two:c}|d");
  assert_eq!(edge.targets(), vec!["b", "c", "d"]);

  let no_default = Edge::switch_case(
    "a",
    vec![("one", "b")],
    None,
    |_| "one".to_string(),
  );
  assert_eq!(no_default.canonical(), "switch_case:a->{one:b}|-");
}

#[test]
fn predicate_fn_wraps_sync_closure() {
  let predicate = predicate_fn(|value| value.as_i64().is_some_and(|n| n % 2 == 0));
  assert!(block_on(predicate(&json!(4))));
  assert!(!block_on(predicate(&json!(3))));
}

#[test]
fn selector_and_merge_wrappers() {
  let selector = selector_fn(|value| value.as_str().unwrap_or("").to_string());
  assert_eq!(selector(&json!("left")), "left");

  let merge = merge_fn(|outputs| json!(outputs.len()));
  assert_eq!(merge(vec![json!(1), json!(2)]), json!(2));
}

#[test]
fn debug_renders_canonical() {
  let edge = Edge::direct("a", "b");
  assert_eq!(format!("{:?}", edge), "Edge(direct:a->b)");
}
