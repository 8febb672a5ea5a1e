//! Superstep driver: runs ready executors concurrently, commits their effects
//! at the barrier, routes outputs, and observes suspend/cancel points.

use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::{ContextEffects, WorkflowContext};
use super::routing::route_output;
use super::{EngineConfig, EngineError, RunOutcome, RunShared};
use crate::checkpoint_store::{CheckpointStore, CheckpointStoreError};
use crate::event_log::EventLog;
use crate::request_broker::{RequestBroker, RequestError, RequestResolution};
use crate::retry::RetryPolicy;
use crate::scoped_state::ScopedStateStore;
use crate::types::{
  Checkpoint, Executor, ExecutorFailure, ExecutorOutput, GraphSignature, RunStatus, WorkflowEventKind,
  WorkflowGraph,
};

/// Barrier-aligned commands from run handles.
pub(crate) enum ControlMsg {
  Checkpoint(oneshot::Sender<Result<String, EngineError>>),
}

enum Wake {
  Resolution(RequestResolution),
  Control(ControlMsg),
  Interrupted,
}

/// Owns one run's mutable state and drives it superstep by superstep.
pub(crate) struct RunDriver {
  pub(crate) graph: Arc<WorkflowGraph>,
  pub(crate) run_id: String,
  pub(crate) config: EngineConfig,
  pub(crate) store: Arc<dyn CheckpointStore>,
  pub(crate) log: Arc<EventLog>,
  pub(crate) broker: Arc<RequestBroker>,
  pub(crate) resolutions: mpsc::UnboundedReceiver<RequestResolution>,
  pub(crate) control: mpsc::UnboundedReceiver<ControlMsg>,
  /// Keeps the control channel open for the run's whole lifetime.
  #[allow(dead_code)]
  pub(crate) control_tx: mpsc::UnboundedSender<ControlMsg>,
  pub(crate) cancel: CancellationToken,
  pub(crate) shared: Arc<RunShared>,
  pub(crate) status: watch::Sender<RunStatus>,
  pub(crate) state: ScopedStateStore,
  pub(crate) outputs: HashMap<String, Value>,
  pub(crate) deliveries: Vec<(String, Value)>,
  pub(crate) fired_fan_ins: HashSet<usize>,
  pub(crate) superstep: u64,
  pub(crate) signature: GraphSignature,
  pub(crate) final_output: Option<Value>,
}

struct InvokeTask {
  index: usize,
  run_id: String,
  executor_id: String,
  input: Value,
  executor: Arc<dyn Executor>,
  policy: RetryPolicy,
  baseline: HashMap<String, HashMap<String, Value>>,
  shared: Arc<RunShared>,
  superstep: u64,
}

/// Invokes one executor with bounded retry. Effects of failed attempts are
/// discarded; only the successful attempt's effects reach the barrier.
async fn invoke_with_retry(
  task: InvokeTask,
) -> (usize, ContextEffects, Result<ExecutorOutput, ExecutorFailure>) {
  let mut failed_attempts = 0u32;
  loop {
    let ctx = WorkflowContext::new(
      task.run_id.clone(),
      task.executor_id.clone(),
      task.superstep,
      task.baseline.clone(),
      Arc::clone(&task.shared),
    );
    match task.executor.execute(task.input.clone(), &ctx).await {
      Ok(output) => return (task.index, ctx.into_effects(), Ok(output)),
      Err(failure) => {
        failed_attempts += 1;
        match task.policy.delay_for(failed_attempts) {
          Some(delay) => {
            warn!(
              executor_id = %task.executor_id,
              attempt = failed_attempts,
              error = %failure,
              "executor failed, retrying"
            );
            tokio::time::sleep(delay).await;
          }
          None => return (task.index, ContextEffects::default(), Err(failure)),
        }
      }
    }
  }
}

impl RunDriver {
  /// Drives the run to an outcome, then publishes it and the final status.
  pub(crate) async fn run(mut self) {
    let outcome = self.drive().await;
    let status = match &outcome {
      RunOutcome::Completed(_) => RunStatus::Completed,
      RunOutcome::Failed(_) => RunStatus::Failed,
      RunOutcome::Cancelled(_) => RunStatus::Cancelled,
      RunOutcome::Suspended { .. } => RunStatus::Suspended,
    };
    *self.shared.outcome.lock().expect("run outcome poisoned") = Some(outcome);
    let _ = self.status.send(status);
  }

  async fn drive(&mut self) -> RunOutcome {
    loop {
      // Superstep boundary: cancellation, control, halt, in that order.
      if self.cancel.is_cancelled() {
        return self.finish_cancelled("run cancelled");
      }
      self.drain_control();
      if self.shared.halt.load(Ordering::SeqCst) {
        return self.suspend();
      }
      if self.deliveries.is_empty() {
        // Resolutions that arrived while a superstep was executing are still
        // queued; drain them before deciding the run is done.
        self.drain_resolutions().await;
        if !self.deliveries.is_empty() {
          continue;
        }
        if self.broker.outstanding() == 0 {
          return self.finish_completed();
        }
        self.set_status(RunStatus::PendingRequests);
        match self.wait_for_wake().await {
          Wake::Resolution(resolution) => self.apply_resolution(resolution).await,
          Wake::Control(msg) => self.handle_control(msg),
          Wake::Interrupted => {}
        }
        continue;
      }
      self.set_status(RunStatus::Running);
      if let Some(outcome) = self.run_superstep().await {
        return outcome;
      }
    }
  }

  /// One synchronization round: spawn the ready wave, await it, then commit
  /// state, events and routing single-threaded at the barrier.
  #[instrument(level = "trace", skip(self), fields(run_id = %self.run_id, superstep = self.superstep))]
  async fn run_superstep(&mut self) -> Option<RunOutcome> {
    let mut wave = std::mem::take(&mut self.deliveries);
    // Sorted executor order keeps event sequences and commit order replayable
    // regardless of completion order.
    wave.sort_by(|a, b| a.0.cmp(&b.0));

    let baseline = self.state.merged_view();
    let mut handles = Vec::with_capacity(wave.len());
    for (index, (executor_id, input)) in wave.iter().enumerate() {
      self.log.append(WorkflowEventKind::ExecutorInvoked {
        executor_id: executor_id.clone(),
      });
      let Some(executor) = self.graph.executor(executor_id) else {
        return Some(self.finish_failed(format!("unknown executor scheduled: {}", executor_id)));
      };
      info!(executor_id = %executor_id, superstep = self.superstep, "executing");
      handles.push(tokio::spawn(invoke_with_retry(InvokeTask {
        index,
        run_id: self.run_id.clone(),
        executor_id: executor_id.clone(),
        input: input.clone(),
        executor: Arc::clone(executor),
        policy: self.config.retry_for(executor_id),
        baseline: baseline.clone(),
        shared: Arc::clone(&self.shared),
        superstep: self.superstep,
      })));
    }

    let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let joined = tokio::select! {
      joined = futures::future::join_all(handles) => Some(joined),
      _ = self.cancel.cancelled() => None,
    };
    let Some(joined) = joined else {
      for handle in abort_handles {
        handle.abort();
      }
      return Some(self.finish_cancelled("run cancelled"));
    };

    let mut results: Vec<Option<(ContextEffects, Result<ExecutorOutput, ExecutorFailure>)>> =
      (0..wave.len()).map(|_| None).collect();
    for joined_task in joined {
      match joined_task {
        Ok((index, effects, result)) => results[index] = Some((effects, result)),
        Err(join_error) => {
          return Some(self.finish_failed(format!("executor task panicked: {}", join_error)));
        }
      }
    }

    // Barrier: effects commit and events flush in sorted executor order.
    let mut completed: Vec<(String, Value)> = Vec::new();
    let mut failure: Option<(String, ExecutorFailure)> = None;
    for ((executor_id, _), slot) in wave.iter().zip(results) {
      let Some((effects, result)) = slot else {
        continue;
      };
      self.state.apply(effects.state_ops);
      for payload in effects.progress {
        self.log.append(WorkflowEventKind::ExecutorProgress {
          executor_id: executor_id.clone(),
          payload,
        });
      }
      match result {
        Ok(ExecutorOutput::Value(output)) => {
          self.log.append(WorkflowEventKind::ExecutorCompleted {
            executor_id: executor_id.clone(),
            output: output.clone(),
          });
          self.outputs.insert(executor_id.clone(), output.clone());
          completed.push((executor_id.clone(), output));
        }
        Ok(ExecutorOutput::AwaitingRequest {
          request_id,
          request_data,
        }) => {
          let request_id = if request_id.is_empty() {
            Uuid::new_v4().to_string()
          } else {
            request_id
          };
          self.log.append(WorkflowEventKind::RequestPending {
            request_id: request_id.clone(),
            executor_id: executor_id.clone(),
            data: request_data.clone(),
          });
          // The engine consumes resolutions through the broker channel; the
          // returned continuation is for direct broker users.
          let _ = self.broker.open(
            request_id,
            executor_id.clone(),
            request_data,
            self.config.request_timeout,
          );
        }
        Err(executor_failure) => {
          self.log.append(WorkflowEventKind::ExecutorFailed {
            executor_id: executor_id.clone(),
            kind: executor_failure.kind.clone(),
            message: executor_failure.message.clone(),
          });
          if failure.is_none() {
            failure = Some((executor_id.clone(), executor_failure));
          }
        }
      }
    }
    if let Some((executor_id, executor_failure)) = failure {
      return Some(self.finish_failed(format!(
        "executor {} failed: {}",
        executor_id, executor_failure
      )));
    }

    let mut next = Vec::new();
    for (executor_id, output) in &completed {
      let routed = route_output(
        &self.graph,
        executor_id,
        output,
        &self.outputs,
        &mut self.fired_fan_ins,
      )
      .await;
      if !routed.had_edges {
        self.final_output = Some(output.clone());
      }
      next.extend(routed.deliveries);
    }
    self.deliveries = next;
    self.superstep += 1;
    self.log.append(WorkflowEventKind::SuperstepCompleted {
      superstep: self.superstep,
    });
    if self.config.checkpoint_every_superstep {
      if let Err(error) = self.create_checkpoint() {
        return Some(self.finish_failed(format!("checkpoint failed: {}", error)));
      }
    }
    None
  }

  /// Blocks until a request resolution, a control message, a halt request, or
  /// cancellation arrives. Only reached while requests are outstanding.
  async fn wait_for_wake(&mut self) -> Wake {
    tokio::select! {
      resolution = self.resolutions.recv() => match resolution {
        Some(resolution) => Wake::Resolution(resolution),
        None => Wake::Interrupted,
      },
      msg = self.control.recv() => match msg {
        Some(msg) => Wake::Control(msg),
        None => Wake::Interrupted,
      },
      _ = self.shared.halt_notify.notified() => Wake::Interrupted,
      _ = self.cancel.cancelled() => Wake::Interrupted,
    }
  }

  /// Applies a broker resolution: a response value becomes the parked
  /// executor's output and is routed like any completed executor; timeout and
  /// cancellation end that path only.
  async fn apply_resolution(&mut self, resolution: RequestResolution) {
    let RequestResolution {
      request_id,
      executor_id,
      result,
    } = resolution;
    match result {
      Ok(value) => {
        info!(request_id = %request_id, executor_id = %executor_id, "request resolved");
        self.log.append(WorkflowEventKind::RequestResolved {
          request_id: request_id.clone(),
        });
        self.log.append(WorkflowEventKind::ExecutorCompleted {
          executor_id: executor_id.clone(),
          output: value.clone(),
        });
        self.outputs.insert(executor_id.clone(), value.clone());
        let routed = route_output(
          &self.graph,
          &executor_id,
          &value,
          &self.outputs,
          &mut self.fired_fan_ins,
        )
        .await;
        if !routed.had_edges {
          self.final_output = Some(value);
        }
        self.deliveries.extend(routed.deliveries);
      }
      Err(RequestError::Timeout(_)) => {
        self.log.append(WorkflowEventKind::RequestTimedOut {
          request_id: request_id.clone(),
        });
      }
      Err(RequestError::Cancelled(_)) => {
        self.log.append(WorkflowEventKind::RequestCancelled {
          request_id: request_id.clone(),
        });
      }
      Err(RequestError::Unknown(_)) => {}
    }
  }

  async fn drain_resolutions(&mut self) {
    while let Ok(resolution) = self.resolutions.try_recv() {
      self.apply_resolution(resolution).await;
    }
  }

  fn drain_control(&mut self) {
    while let Ok(msg) = self.control.try_recv() {
      self.handle_control(msg);
    }
  }

  fn handle_control(&mut self, msg: ControlMsg) {
    match msg {
      ControlMsg::Checkpoint(reply) => {
        let result = self.create_checkpoint().map_err(EngineError::from);
        let _ = reply.send(result);
      }
    }
  }

  /// Commits the scoped state and captures the full run snapshot; prunes the
  /// store to the configured retention afterwards.
  fn create_checkpoint(&mut self) -> Result<String, CheckpointStoreError> {
    let scoped_state = self.state.snapshot();
    let checkpoint_id = Uuid::new_v4().to_string();
    let mut fired_fan_ins: Vec<usize> = self.fired_fan_ins.iter().copied().collect();
    fired_fan_ins.sort_unstable();
    let checkpoint = Checkpoint {
      checkpoint_id: checkpoint_id.clone(),
      workflow_id: self.run_id.clone(),
      created_at: Utc::now(),
      graph_signature: self.signature.clone(),
      superstep: self.superstep,
      scoped_state,
      executor_outputs: self.outputs.clone(),
      pending_deliveries: self.deliveries.clone(),
      fired_fan_ins,
      event_log: self.log.snapshot(),
      pending_requests: self.broker.pending_snapshot(),
      halt_requested: self.shared.halt.load(Ordering::SeqCst),
    };
    self.store.save(&checkpoint)?;
    info!(checkpoint_id = %checkpoint_id, superstep = self.superstep, "checkpoint created");
    self.log.append(WorkflowEventKind::CheckpointCreated {
      checkpoint_id: checkpoint_id.clone(),
    });
    if let Some(keep) = self.config.checkpoint_retention {
      for stale in self.store.list(&self.run_id)?.into_iter().skip(keep.max(1)) {
        self.store.delete(&stale)?;
      }
    }
    Ok(checkpoint_id)
  }

  fn suspend(&mut self) -> RunOutcome {
    match self.create_checkpoint() {
      Ok(checkpoint_id) => {
        info!(run_id = %self.run_id, checkpoint_id = %checkpoint_id, "run suspended");
        // The log of this handle ends here; a resumed run continues it.
        self.log.seal();
        RunOutcome::Suspended { checkpoint_id }
      }
      Err(error) => self.finish_failed(format!("suspend checkpoint failed: {}", error)),
    }
  }

  fn finish_completed(&mut self) -> RunOutcome {
    let output = self
      .final_output
      .clone()
      .or_else(|| self.cached_sink_output())
      .unwrap_or(Value::Null);
    info!(run_id = %self.run_id, supersteps = self.superstep, "workflow completed");
    self.log.append_terminal(WorkflowEventKind::WorkflowCompleted {
      output: output.clone(),
    });
    RunOutcome::Completed(output)
  }

  /// Output of the last sink executor (sorted by id) with a cached output.
  /// Covers resumed runs whose sink already completed before the checkpoint.
  fn cached_sink_output(&self) -> Option<Value> {
    let mut ids: Vec<&String> = self.outputs.keys().collect();
    ids.sort_unstable();
    ids
      .into_iter()
      .filter(|id| self.graph.outgoing_edges(id.as_str()).is_empty())
      .next_back()
      .and_then(|id| self.outputs.get(id).cloned())
  }

  fn finish_failed(&mut self, message: String) -> RunOutcome {
    self.cancel_outstanding_requests();
    warn!(run_id = %self.run_id, message = %message, "workflow failed");
    self.log.append_terminal(WorkflowEventKind::WorkflowFailed {
      message: message.clone(),
    });
    RunOutcome::Failed(message)
  }

  fn finish_cancelled(&mut self, message: &str) -> RunOutcome {
    self.cancel_outstanding_requests();
    info!(run_id = %self.run_id, "workflow cancelled");
    self.log.append_terminal(WorkflowEventKind::WorkflowCancelled {
      message: message.to_string(),
    });
    RunOutcome::Cancelled(message.to_string())
  }

  /// Flushes cancellation events for requests still pending, then resolves
  /// them so no continuation is left dangling.
  fn cancel_outstanding_requests(&mut self) {
    for pending in self.broker.pending_snapshot() {
      self.log.append(WorkflowEventKind::RequestCancelled {
        request_id: pending.request_id,
      });
    }
    self.broker.cancel_all();
  }

  fn set_status(&self, status: RunStatus) {
    self.status.send_if_modified(|current| {
      if *current != status {
        *current = status;
        true
      } else {
        false
      }
    });
  }
}
