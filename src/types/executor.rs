//! Executor capability: a named unit of work in the workflow graph.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::WorkflowContext;

/// Default type signature for executors that exchange untyped JSON.
pub const JSON_SIGNATURE: &str = "json";

/// Fatal error returned by an executor's capability.
///
/// Aborts the run unless a retry policy recovers it; surfaced to consumers as
/// an `ExecutorFailed` event followed by a terminal failure event.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecutorFailure {
  /// Short machine-readable kind (e.g. `io`, `invalid_input`).
  pub kind: String,
  pub message: String,
}

impl ExecutorFailure {
  pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      message: message.into(),
    }
  }
}

/// Result of one executor invocation.
#[derive(Debug, Clone)]
pub enum ExecutorOutput {
  /// Finished with a value; routed along the executor's outgoing edges.
  Value(Value),
  /// Suspend this execution path until an external response arrives.
  ///
  /// The engine parks the path in the request broker; the response value
  /// becomes this executor's output and is routed at the next superstep.
  AwaitingRequest {
    /// Caller-chosen id; the engine generates one when empty.
    request_id: String,
    request_data: Value,
  },
}

impl ExecutorOutput {
  pub fn value(value: impl Into<Value>) -> Self {
    ExecutorOutput::Value(value.into())
  }

  pub fn awaiting(request_id: impl Into<String>, request_data: Value) -> Self {
    ExecutorOutput::AwaitingRequest {
      request_id: request_id.into(),
      request_data,
    }
  }
}

/// A named unit of work: accepts one input plus a context handle and produces
/// one output or a fatal error.
///
/// The engine never inspects what the computation is; routing only needs the
/// id and, for signature hashing, the declared type signatures.
#[async_trait]
pub trait Executor: Send + Sync {
  /// Stable identity, unique within a graph and stable across runs.
  fn id(&self) -> &str;

  /// Opaque input type signature; used only for hashing and compatibility.
  fn input_signature(&self) -> &str {
    JSON_SIGNATURE
  }

  /// Opaque output type signature; used only for hashing and compatibility.
  fn output_signature(&self) -> &str {
    JSON_SIGNATURE
  }

  async fn execute(
    &self,
    input: Value,
    ctx: &WorkflowContext,
  ) -> Result<ExecutorOutput, ExecutorFailure>;
}

type ExecuteFn = dyn for<'a> Fn(Value, &'a WorkflowContext) -> BoxFuture<'a, Result<ExecutorOutput, ExecutorFailure>>
  + Send
  + Sync;

/// Executor backed by a closure; the usual way to assemble graphs in tests
/// and small callers.
pub struct FnExecutor {
  id: String,
  input_signature: String,
  output_signature: String,
  run: Arc<ExecuteFn>,
}

impl FnExecutor {
  pub fn new(
    id: impl Into<String>,
    run: impl for<'a> Fn(Value, &'a WorkflowContext) -> BoxFuture<'a, Result<ExecutorOutput, ExecutorFailure>>
    + Send
    + Sync
    + 'static,
  ) -> Self {
    Self {
      id: id.into(),
      input_signature: JSON_SIGNATURE.to_string(),
      output_signature: JSON_SIGNATURE.to_string(),
      run: Arc::new(run),
    }
  }

  /// Wraps a pure synchronous function over the payload.
  pub fn map(id: impl Into<String>, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
    let f = Arc::new(f);
    Self::new(id, move |input, _ctx| {
      let f = Arc::clone(&f);
      Box::pin(async move { Ok(ExecutorOutput::Value(f(input))) })
    })
  }

  /// Wraps a fallible synchronous function over the payload.
  pub fn try_map(
    id: impl Into<String>,
    f: impl Fn(Value) -> Result<Value, ExecutorFailure> + Send + Sync + 'static,
  ) -> Self {
    let f = Arc::new(f);
    Self::new(id, move |input, _ctx| {
      let f = Arc::clone(&f);
      Box::pin(async move { f(input).map(ExecutorOutput::Value) })
    })
  }

  pub fn with_signatures(
    mut self,
    input_signature: impl Into<String>,
    output_signature: impl Into<String>,
  ) -> Self {
    self.input_signature = input_signature.into();
    self.output_signature = output_signature.into();
    self
  }
}

#[async_trait]
impl Executor for FnExecutor {
  fn id(&self) -> &str {
    &self.id
  }

  fn input_signature(&self) -> &str {
    &self.input_signature
  }

  fn output_signature(&self) -> &str {
    &self.output_signature
  }

  async fn execute(
    &self,
    input: Value,
    ctx: &WorkflowContext,
  ) -> Result<ExecutorOutput, ExecutorFailure> {
    (self.run)(input, ctx).await
  }
}

impl std::fmt::Debug for FnExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FnExecutor")
      .field("id", &self.id)
      .field("input_signature", &self.input_signature)
      .field("output_signature", &self.output_signature)
      .finish_non_exhaustive()
  }
}
