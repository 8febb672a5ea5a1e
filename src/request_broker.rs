//! Pending human-in-the-loop requests: resolution, cancellation, timeouts.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::types::PendingRequestSnapshot;

/// Broker-scoped errors. These resolve one pending continuation; they never
/// abort the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
  #[error("unknown or already resolved request: {0}")]
  Unknown(String),
  #[error("request timed out: {0}")]
  Timeout(String),
  #[error("request cancelled: {0}")]
  Cancelled(String),
}

/// Outcome delivered to whoever parked on a request.
pub type RequestResult = Result<Value, RequestError>;

/// Resolution record pushed to the engine's fan-in channel.
#[derive(Debug, Clone)]
pub struct RequestResolution {
  pub request_id: String,
  pub executor_id: String,
  pub result: RequestResult,
}

struct PendingEntry {
  executor_id: String,
  data: Value,
  created_at: DateTime<Utc>,
  deadline: Option<DateTime<Utc>>,
  responder: oneshot::Sender<RequestResult>,
  timeout_task: Option<JoinHandle<()>>,
}

/// Tracks outstanding requests and resolves each exactly once: by response,
/// by cancellation, or by timeout. The outstanding count gates the run's
/// pending-requests state.
pub struct RequestBroker {
  entries: Mutex<HashMap<String, PendingEntry>>,
  resolutions: mpsc::UnboundedSender<RequestResolution>,
}

impl RequestBroker {
  /// Returns the broker plus the resolution stream the engine loop consumes.
  pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RequestResolution>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
      Arc::new(Self {
        entries: Mutex::new(HashMap::new()),
        resolutions: tx,
      }),
      rx,
    )
  }

  /// Registers a request and returns the parked continuation. A configured
  /// timeout auto-cancels with [RequestError::Timeout] and removes the entry.
  /// Re-opening an existing id cancels the previous request first.
  #[instrument(level = "trace", skip_all)]
  pub fn open(
    self: &Arc<Self>,
    request_id: impl Into<String>,
    executor_id: impl Into<String>,
    data: Value,
    timeout: Option<Duration>,
  ) -> oneshot::Receiver<RequestResult> {
    self.open_at(request_id, executor_id, data, Utc::now(), timeout)
  }

  /// [open](Self::open) with an explicit creation time; used when restoring
  /// requests from a checkpoint.
  pub fn open_at(
    self: &Arc<Self>,
    request_id: impl Into<String>,
    executor_id: impl Into<String>,
    data: Value,
    created_at: DateTime<Utc>,
    timeout: Option<Duration>,
  ) -> oneshot::Receiver<RequestResult> {
    let request_id = request_id.into();
    let _ = self.cancel(&request_id);

    let (responder, receiver) = oneshot::channel();
    let timeout_task = timeout.map(|after| {
      let broker = Arc::downgrade(self);
      let id = request_id.clone();
      tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(broker) = broker.upgrade() {
          let _ = broker.resolve(&id, Err(RequestError::Timeout(id.clone())));
        }
      })
    });
    let deadline = timeout.and_then(|after| {
      chrono::TimeDelta::from_std(after)
        .ok()
        .map(|delta| created_at + delta)
    });
    let entry = PendingEntry {
      executor_id: executor_id.into(),
      data,
      created_at,
      deadline,
      responder,
      timeout_task,
    };
    self
      .entries
      .lock()
      .expect("request broker poisoned")
      .insert(request_id, entry);
    receiver
  }

  /// Resolves the continuation with the supplied data, exactly once. A second
  /// resolution or an unknown id fails with [RequestError::Unknown].
  pub fn handle_response(&self, request_id: &str, data: Value) -> Result<(), RequestError> {
    self.resolve(request_id, Ok(data))
  }

  /// Resolves the continuation with a cancellation error instead of data.
  pub fn cancel(&self, request_id: &str) -> Result<(), RequestError> {
    self.resolve(
      request_id,
      Err(RequestError::Cancelled(request_id.to_string())),
    )
  }

  /// Cancels every outstanding request; used when the run terminates.
  pub fn cancel_all(&self) {
    let ids: Vec<String> = {
      let entries = self.entries.lock().expect("request broker poisoned");
      entries.keys().cloned().collect()
    };
    for id in ids {
      let _ = self.cancel(&id);
    }
  }

  fn resolve(&self, request_id: &str, result: RequestResult) -> Result<(), RequestError> {
    let entry = self
      .entries
      .lock()
      .expect("request broker poisoned")
      .remove(request_id)
      .ok_or_else(|| RequestError::Unknown(request_id.to_string()))?;
    // Any resolution path must clear the timer so a stray timeout cannot fire
    // after the fact.
    if let Some(task) = entry.timeout_task {
      task.abort();
    }
    debug!(request_id = %request_id, ok = result.is_ok(), "request resolved");
    let _ = entry.responder.send(result.clone());
    let _ = self.resolutions.send(RequestResolution {
      request_id: request_id.to_string(),
      executor_id: entry.executor_id,
      result,
    });
    Ok(())
  }

  /// Number of requests still awaiting resolution.
  pub fn outstanding(&self) -> usize {
    self.entries.lock().expect("request broker poisoned").len()
  }

  /// Snapshot of every pending request, sorted by id; captured in checkpoints.
  pub fn pending_snapshot(&self) -> Vec<PendingRequestSnapshot> {
    let entries = self.entries.lock().expect("request broker poisoned");
    let mut snapshots: Vec<PendingRequestSnapshot> = entries
      .iter()
      .map(|(id, entry)| PendingRequestSnapshot {
        request_id: id.clone(),
        executor_id: entry.executor_id.clone(),
        data: entry.data.clone(),
        created_at: entry.created_at,
      })
      .collect();
    snapshots.sort_by(|a, b| a.request_id.cmp(&b.request_id));
    snapshots
  }

  /// Deadline recorded for a pending request, if any.
  pub fn deadline(&self, request_id: &str) -> Option<DateTime<Utc>> {
    let entries = self.entries.lock().expect("request broker poisoned");
    entries.get(request_id).and_then(|e| e.deadline)
  }
}
