//! Adapter over a durable orchestration substrate that only exposes polling.
//!
//! The substrate publishes a bounded window of recent serialized events via a
//! periodically-refreshed custom status, plus a final artifact produced
//! exactly once on completion containing the complete log and the extracted
//! result. The adapter turns that into an ordinary incremental event stream.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event_log::IncrementalCursor;
use crate::types::{GENERIC_FAILURE_MESSAGE, WorkflowEvent, WorkflowEventKind};

/// Default bound on the custom-status recent-events window. This only affects
/// polling efficiency, never correctness: the final artifact always carries
/// the complete log.
pub const DEFAULT_STATUS_WINDOW: usize = 20;

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Coarse run status reported by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstrateRunStatus {
  Pending,
  Running,
  Completed,
  Failed,
  /// Terminated externally; distinct from an executor-raised failure.
  Terminated,
}

impl SubstrateRunStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      SubstrateRunStatus::Completed | SubstrateRunStatus::Failed | SubstrateRunStatus::Terminated
    )
  }
}

/// One custom-status poll: coarse status plus the most recent event window.
/// Successive polls may overlap arbitrarily; consumers de-duplicate by
/// sequence index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
  pub status: SubstrateRunStatus,
  pub recent_events: Vec<WorkflowEvent>,
}

/// Final artifact, produced exactly once when the instance completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalArtifact {
  /// The complete event log.
  pub events: Vec<WorkflowEvent>,
  pub output: Option<Value>,
  pub failure: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstrateError {
  #[error("substrate unavailable: {0}")]
  Unavailable(String),
  #[error("unknown instance: {0}")]
  UnknownInstance(String),
}

/// The durable orchestration primitive the adapter runs atop. Only submit,
/// poll, wait-for-completion, and cancel are assumed.
#[async_trait]
pub trait DurableSubstrate: Send + Sync {
  /// Submits a run and returns the substrate's instance id.
  async fn submit(&self, workflow_id: &str, input: Value) -> Result<String, SubstrateError>;
  async fn poll_status(&self, instance_id: &str) -> Result<StatusSnapshot, SubstrateError>;
  /// Waits for completion and returns the final artifact.
  async fn fetch_result(&self, instance_id: &str) -> Result<FinalArtifact, SubstrateError>;
  async fn cancel(&self, instance_id: &str) -> Result<(), SubstrateError>;
}

/// Streams one substrate instance's events incrementally over polling.
///
/// Each poll yields only strictly-new events. On a terminal status the final
/// artifact is drained for events never seen via the status channel, then
/// exactly one terminal event is yielded. When the caller cancels, the
/// adapter drains what is already available and stops quietly.
pub struct DurableRunAdapter<S> {
  substrate: Arc<S>,
  instance_id: String,
  poll_interval: Duration,
  cancel: CancellationToken,
}

impl<S: DurableSubstrate + 'static> DurableRunAdapter<S> {
  pub fn new(substrate: Arc<S>, instance_id: impl Into<String>) -> Self {
    Self {
      substrate,
      instance_id: instance_id.into(),
      poll_interval: DEFAULT_POLL_INTERVAL,
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  /// The incremental event stream. Finite: ends after the terminal event, or
  /// after draining on cancellation.
  pub fn stream(self) -> impl futures::Stream<Item = WorkflowEvent> + Send + 'static {
    async_stream::stream! {
      let mut cursor = IncrementalCursor::new();
      let mut terminal_seen = false;
      loop {
        if self.cancel.is_cancelled() {
          // Drain whatever is already available; no signal after cancel.
          if let Ok(snapshot) = self.substrate.poll_status(&self.instance_id).await {
            for event in cursor.absorb(snapshot.recent_events) {
              if event.is_terminal() {
                terminal_seen = true;
              }
              yield event;
              if terminal_seen {
                return;
              }
            }
          }
          return;
        }

        let snapshot = match self.substrate.poll_status(&self.instance_id).await {
          Ok(snapshot) => snapshot,
          Err(error) => {
            warn!(instance_id = %self.instance_id, error = %error, "status poll failed");
            tokio::select! {
              _ = tokio::time::sleep(self.poll_interval) => {},
              _ = self.cancel.cancelled() => {},
            }
            continue;
          }
        };
        for event in cursor.absorb(snapshot.recent_events) {
          if event.is_terminal() {
            terminal_seen = true;
          }
          yield event;
          if terminal_seen {
            return;
          }
        }

        if snapshot.status.is_terminal() {
          match self.substrate.fetch_result(&self.instance_id).await {
            Ok(mut artifact) => {
              // Events present only in the final artifact were never seen via
              // the status channel; the cursor drops everything else.
              for event in cursor.absorb(std::mem::take(&mut artifact.events)) {
                if event.is_terminal() {
                  terminal_seen = true;
                }
                yield event;
                if terminal_seen {
                  return;
                }
              }
              yield synthesize_terminal(snapshot.status, &artifact, cursor.last_seen());
            }
            Err(error) => {
              warn!(instance_id = %self.instance_id, error = %error, "final artifact fetch failed");
              yield WorkflowEvent {
                sequence: cursor.last_seen().map(|seq| seq + 1).unwrap_or(0),
                timestamp: Utc::now(),
                kind: WorkflowEventKind::WorkflowFailed {
                  message: error.to_string(),
                },
              };
            }
          }
          return;
        }

        tokio::select! {
          _ = tokio::time::sleep(self.poll_interval) => {},
          _ = self.cancel.cancelled() => {},
        }
      }
    }
  }
}

/// Synthesizes the single terminal event for runs whose log did not record
/// one: success wraps the extracted output, failure wraps the best available
/// message, external termination maps to the cancelled variant.
fn synthesize_terminal(
  status: SubstrateRunStatus,
  artifact: &FinalArtifact,
  last_seen: Option<u64>,
) -> WorkflowEvent {
  let sequence = last_seen.map(|seq| seq + 1).unwrap_or(0);
  let kind = match status {
    SubstrateRunStatus::Completed => WorkflowEventKind::WorkflowCompleted {
      output: artifact.output.clone().unwrap_or(Value::Null),
    },
    SubstrateRunStatus::Terminated => WorkflowEventKind::WorkflowCancelled {
      message: artifact
        .failure
        .clone()
        .unwrap_or_else(|| "terminated externally".to_string()),
    },
    _ => WorkflowEventKind::WorkflowFailed {
      message: artifact
        .failure
        .clone()
        .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
    },
  };
  WorkflowEvent {
    sequence,
    timestamp: Utc::now(),
    kind,
  }
}
