//! # weftline
//!
//! Superstep-based workflow graph execution with durable checkpoints.
//!
//! A workflow is a directed graph of [Executor](types::Executor)s connected
//! by [Edge](types::Edge)s. The [engine](engine::Engine) runs it in discrete
//! synchronization rounds: within one superstep every ready executor runs
//! concurrently, and outputs, state writes and events become visible together
//! at the superstep boundary. Runs stream [events](types::WorkflowEvent)
//! incrementally, suspend into immutable [checkpoints](types::Checkpoint),
//! and resume only against a graph whose
//! [signature](types::GraphSignature) is still compatible.

pub mod checkpoint_store;
#[cfg(test)]
mod checkpoint_store_test;
pub mod durable;
pub mod engine;
pub mod event_log;
#[cfg(test)]
mod event_log_test;
pub mod request_broker;
pub mod retry;
pub mod scoped_state;
pub mod types;

pub use checkpoint_store::{
  CheckpointStore, CheckpointStoreError, FsCheckpointStore, InMemoryCheckpointStore,
};
pub use engine::{Engine, EngineConfig, EngineError, RunHandle, RunOutcome, WorkflowContext};
pub use event_log::{EventLog, IncrementalCursor};
pub use request_broker::{RequestBroker, RequestError};
pub use retry::RetryPolicy;
pub use scoped_state::{ScopedStateStore, StateKeyError, StateOp};
pub use types::{
  Checkpoint, CompatibilityMode, Edge, Executor, ExecutorFailure, ExecutorOutput, FnExecutor,
  GraphSignature, RunStatus, SignatureChange, StructuralError, WorkflowEvent, WorkflowEventKind,
  WorkflowGraph, WorkflowGraphBuilder,
};
