//! Workflow graph value types.
//!
//! The graph owns executors in an id-indexed arena; edges reference executors
//! by id only, which keeps the graph serializable for signature hashing.

mod checkpoint;
#[cfg(test)]
mod checkpoint_test;
mod edge;
#[cfg(test)]
mod edge_test;
mod executor;
mod graph_signature;
#[cfg(test)]
mod graph_signature_test;
mod run_status;
mod workflow_event;
mod workflow_graph;

pub use checkpoint::{Checkpoint, PendingRequestSnapshot};
pub use edge::{CaseSelector, Edge, EdgePredicate, MergeFn, merge_fn, predicate_fn, selector_fn};
pub use executor::{Executor, ExecutorFailure, ExecutorOutput, FnExecutor, JSON_SIGNATURE};
pub use graph_signature::{
  CompatibilityMode, GraphSignature, SIGNATURE_VERSION, SignatureChange, SignatureMismatch,
};
pub use run_status::RunStatus;
pub use workflow_event::{GENERIC_FAILURE_MESSAGE, WorkflowEvent, WorkflowEventKind};
pub use workflow_graph::{StructuralError, WorkflowGraph, WorkflowGraphBuilder};
