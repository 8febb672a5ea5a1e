//! Workflow graph: executor arena, edges, entry point, structural validation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use super::{Edge, Executor, GraphSignature};

/// Invalid graph structure. Raised by [WorkflowGraphBuilder::build] (and the
/// engine's defensive re-validation), never during execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralError {
  #[error("graph has no entry executor")]
  MissingEntry,
  #[error("entry references unknown executor: {0}")]
  UnknownEntry(String),
  #[error("duplicate executor id: {0}")]
  DuplicateExecutor(String),
  #[error("edge {edge} references unknown executor: {id}")]
  UnknownExecutor { edge: String, id: String },
  #[error("cycle detected through executor: {0}")]
  Cycle(String),
  #[error("executor unreachable from entry: {0}")]
  Unreachable(String),
}

/// Immutable, validated workflow graph.
///
/// Built through [WorkflowGraphBuilder]; changing the structure means
/// rebuilding and re-validating a new graph.
pub struct WorkflowGraph {
  executors: HashMap<String, Arc<dyn Executor>>,
  edges: Vec<Edge>,
  entry: String,
}

impl WorkflowGraph {
  pub fn builder() -> WorkflowGraphBuilder {
    WorkflowGraphBuilder::default()
  }

  pub fn entry(&self) -> &str {
    &self.entry
  }

  pub fn executor(&self, id: &str) -> Option<&Arc<dyn Executor>> {
    self.executors.get(id)
  }

  /// Executor ids in sorted order.
  pub fn executor_ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }

  pub fn executors(&self) -> &HashMap<String, Arc<dyn Executor>> {
    &self.executors
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Edges that route the given executor's output.
  pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
    self
      .edges
      .iter()
      .filter(|e| e.sources().contains(&id))
      .collect()
  }

  /// Deterministic signature over the graph structure.
  pub fn signature(&self) -> GraphSignature {
    GraphSignature::of(self)
  }

  /// Re-runs the structural gates. Builders validate on `build`; the engine
  /// calls this again before scheduling anything.
  #[instrument(level = "trace", skip(self))]
  pub fn validate(&self) -> Result<(), StructuralError> {
    if self.entry.is_empty() {
      return Err(StructuralError::MissingEntry);
    }
    if !self.executors.contains_key(&self.entry) {
      return Err(StructuralError::UnknownEntry(self.entry.clone()));
    }
    for edge in &self.edges {
      for id in edge.sources().into_iter().chain(edge.targets()) {
        if !self.executors.contains_key(id) {
          return Err(StructuralError::UnknownExecutor {
            edge: edge.canonical(),
            id: id.to_string(),
          });
        }
      }
    }
    self.check_cycles_and_reachability()
  }

  /// Depth-first search from the entry with a recursion-stack marker:
  /// revisiting an executor still on the stack is a cycle. Executors never
  /// visited are unreachable.
  fn check_cycles_and_reachability(&self) -> Result<(), StructuralError> {
    let adjacency = self.adjacency();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    // Iterative DFS; a None frame marks leaving the node below it.
    let mut stack: Vec<(&str, bool)> = vec![(self.entry.as_str(), false)];
    while let Some((id, leaving)) = stack.pop() {
      if leaving {
        on_stack.remove(id);
        continue;
      }
      if on_stack.contains(id) {
        return Err(StructuralError::Cycle(id.to_string()));
      }
      if !visited.insert(id) {
        continue;
      }
      on_stack.insert(id);
      stack.push((id, true));
      if let Some(next) = adjacency.get(id) {
        for target in next.iter().rev() {
          if on_stack.contains(target.as_str()) {
            return Err(StructuralError::Cycle(target.to_string()));
          }
          stack.push((target.as_str(), false));
        }
      }
    }
    let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
    ids.sort_unstable();
    for id in ids {
      if !visited.contains(id) {
        return Err(StructuralError::Unreachable(id.to_string()));
      }
    }
    Ok(())
  }

  /// Source id -> every id its outgoing edges may route to.
  fn adjacency(&self) -> HashMap<&str, Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<String>> = HashMap::new();
    for edge in &self.edges {
      match edge {
        Edge::FanIn { from, to, .. } => {
          for source in from {
            adjacency
              .entry(source.as_str())
              .or_default()
              .push(to.clone());
          }
        }
        _ => {
          let from = edge.sources()[0];
          let entry = adjacency.entry(from).or_default();
          for target in edge.targets() {
            entry.push(target.to_string());
          }
        }
      }
    }
    adjacency
  }
}

impl std::fmt::Debug for WorkflowGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkflowGraph")
      .field("entry", &self.entry)
      .field("executors", &self.executor_ids())
      .field("edges", &self.edges)
      .finish()
  }
}

/// Accumulates executors and edges, then validates on [build](Self::build).
#[derive(Default)]
pub struct WorkflowGraphBuilder {
  executors: HashMap<String, Arc<dyn Executor>>,
  edges: Vec<Edge>,
  entry: Option<String>,
  duplicate: Option<String>,
}

impl WorkflowGraphBuilder {
  pub fn add_executor(self, executor: impl Executor + 'static) -> Self {
    self.add_arc_executor(Arc::new(executor))
  }

  pub fn add_arc_executor(mut self, executor: Arc<dyn Executor>) -> Self {
    let id = executor.id().to_string();
    if self.executors.insert(id.clone(), executor).is_some() && self.duplicate.is_none() {
      self.duplicate = Some(id);
    }
    self
  }

  pub fn add_edge(mut self, edge: Edge) -> Self {
    self.edges.push(edge);
    self
  }

  pub fn entry(mut self, id: impl Into<String>) -> Self {
    self.entry = Some(id.into());
    self
  }

  pub fn build(self) -> Result<WorkflowGraph, StructuralError> {
    if let Some(id) = self.duplicate {
      return Err(StructuralError::DuplicateExecutor(id));
    }
    let graph = WorkflowGraph {
      executors: self.executors,
      edges: self.edges,
      entry: self.entry.ok_or(StructuralError::MissingEntry)?,
    };
    graph.validate()?;
    Ok(graph)
  }
}
