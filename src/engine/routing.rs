//! Routes a completed executor's output across its outgoing edges.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::types::{Edge, WorkflowGraph};

/// Deliveries produced by routing one output at a superstep barrier.
#[derive(Debug, Default)]
pub(crate) struct RoutingOutcome {
  /// Target executor id paired with the input it receives next superstep.
  pub deliveries: Vec<(String, Value)>,
  /// Whether any outgoing edge exists for the executor. An executor with no
  /// outgoing edges is a sink; its output is a terminal-output candidate.
  pub had_edges: bool,
}

/// Applies the routing rules for every edge that lists `executor_id` as a
/// source. Fan-in edges fire at most once, and only when every source has a
/// cached output; the merge sees outputs in declared order, not completion
/// order.
pub(crate) async fn route_output(
  graph: &WorkflowGraph,
  executor_id: &str,
  output: &Value,
  outputs: &HashMap<String, Value>,
  fired_fan_ins: &mut HashSet<usize>,
) -> RoutingOutcome {
  let mut outcome = RoutingOutcome::default();
  for (index, edge) in graph.edges().iter().enumerate() {
    match edge {
      Edge::Direct { from, to } if from == executor_id => {
        outcome.had_edges = true;
        outcome.deliveries.push((to.clone(), output.clone()));
      }
      Edge::Conditional {
        from,
        predicate,
        true_branch,
        false_branch,
      } if from == executor_id => {
        outcome.had_edges = true;
        if predicate(output).await {
          outcome.deliveries.push((true_branch.clone(), output.clone()));
        } else if let Some(branch) = false_branch {
          outcome.deliveries.push((branch.clone(), output.clone()));
        }
        // false with no false branch: the path terminates, no error
      }
      Edge::FanOut { from, to } if from == executor_id => {
        outcome.had_edges = true;
        for target in to {
          outcome.deliveries.push((target.clone(), output.clone()));
        }
      }
      Edge::FanIn { from, to, merge } if from.iter().any(|id| id == executor_id) => {
        outcome.had_edges = true;
        if fired_fan_ins.contains(&index) {
          continue;
        }
        let inputs: Option<Vec<Value>> = from.iter().map(|id| outputs.get(id).cloned()).collect();
        if let Some(inputs) = inputs {
          fired_fan_ins.insert(index);
          outcome.deliveries.push((to.clone(), merge(inputs)));
        }
      }
      Edge::SwitchCase {
        from,
        selector,
        cases,
        default,
      } if from == executor_id => {
        outcome.had_edges = true;
        let key = selector(output);
        match cases.iter().find(|(case, _)| *case == key) {
          Some((_, target)) => outcome.deliveries.push((target.clone(), output.clone())),
          None => {
            if let Some(target) = default {
              outcome.deliveries.push((target.clone(), output.clone()));
            }
            // no case and no default: the path terminates, no error
          }
        }
      }
      _ => {}
    }
  }
  outcome
}
