//! Append-only event log with full replay, incremental delivery, and a lazy
//! async stream.

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

use crate::types::{WorkflowEvent, WorkflowEventKind};

#[derive(Debug, Default)]
struct LogInner {
  events: Vec<WorkflowEvent>,
  sealed: bool,
}

/// Monotonically-indexed sequence of workflow events for one run.
///
/// Events are appended in strictly increasing sequence order and never
/// reordered or removed. Sealing marks the log finite; streams drain and end.
#[derive(Debug, Default)]
pub struct EventLog {
  inner: Mutex<LogInner>,
  notify: Notify,
}

impl EventLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// A log continuing an existing record, e.g. when resuming a checkpoint.
  /// The next sequence follows the last preloaded event.
  pub fn preload(events: Vec<WorkflowEvent>) -> Self {
    Self {
      inner: Mutex::new(LogInner {
        events,
        sealed: false,
      }),
      notify: Notify::new(),
    }
  }

  /// Appends an event with the next sequence index and returns it.
  pub fn append(&self, kind: WorkflowEventKind) -> WorkflowEvent {
    let mut inner = self.inner.lock().expect("event log poisoned");
    debug_assert!(!inner.sealed, "append after seal");
    let sequence = inner.events.last().map(|e| e.sequence + 1).unwrap_or(0);
    let event = WorkflowEvent::new(sequence, kind);
    inner.events.push(event.clone());
    drop(inner);
    self.notify.notify_waiters();
    event
  }

  /// Appends the run's single terminal event and seals the log.
  pub fn append_terminal(&self, kind: WorkflowEventKind) -> WorkflowEvent {
    debug_assert!(kind.is_terminal());
    let event = self.append(kind);
    self.seal();
    event
  }

  /// Marks the log finite. Streams drain whatever is left, then end.
  pub fn seal(&self) {
    {
      let mut inner = self.inner.lock().expect("event log poisoned");
      if inner.sealed {
        return;
      }
      inner.sealed = true;
      debug!(events = inner.events.len(), "event log sealed");
    }
    self.notify.notify_waiters();
  }

  pub fn is_sealed(&self) -> bool {
    self.inner.lock().expect("event log poisoned").sealed
  }

  pub fn len(&self) -> usize {
    self.inner.lock().expect("event log poisoned").events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Full replay of the log so far.
  pub fn snapshot(&self) -> Vec<WorkflowEvent> {
    self.inner.lock().expect("event log poisoned").events.clone()
  }

  /// Events with a sequence strictly greater than `after` (all events when
  /// `None`). Incremental consumers pass their highest seen index.
  pub fn events_after(&self, after: Option<u64>) -> Vec<WorkflowEvent> {
    let inner = self.inner.lock().expect("event log poisoned");
    match after {
      None => inner.events.clone(),
      Some(seq) => inner
        .events
        .iter()
        .filter(|e| e.sequence > seq)
        .cloned()
        .collect(),
    }
  }

  /// Lazy stream of the whole log from the start; waits for new events until
  /// the log is sealed. Restartable: every call yields an independent stream.
  pub fn stream(self: &Arc<Self>) -> impl futures::Stream<Item = WorkflowEvent> + Send + 'static {
    self.stream_after(None)
  }

  /// Lazy stream of events after the given sequence index.
  pub fn stream_after(
    self: &Arc<Self>,
    after: Option<u64>,
  ) -> impl futures::Stream<Item = WorkflowEvent> + Send + 'static {
    let log = Arc::clone(self);
    async_stream::stream! {
      let mut cursor = after;
      loop {
        // Register before reading so an append between the read and the await
        // still wakes us.
        let notified = log.notify.notified();
        let (batch, sealed) = {
          let inner = log.inner.lock().expect("event log poisoned");
          let batch: Vec<WorkflowEvent> = match cursor {
            None => inner.events.clone(),
            Some(seq) => inner
              .events
              .iter()
              .filter(|e| e.sequence > seq)
              .cloned()
              .collect(),
          };
          (batch, inner.sealed)
        };
        if !batch.is_empty() {
          for event in batch {
            cursor = Some(event.sequence);
            yield event;
          }
          continue;
        }
        if sealed {
          break;
        }
        notified.await;
      }
    }
  }
}

/// Tracks the highest sequence index already delivered, de-duplicating
/// overlapping poll windows from a substrate that republishes recent events.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalCursor {
  last_seen: Option<u64>,
}

impl IncrementalCursor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn resume_from(sequence: Option<u64>) -> Self {
    Self {
      last_seen: sequence,
    }
  }

  pub fn last_seen(&self) -> Option<u64> {
    self.last_seen
  }

  /// Filters a window down to strictly-new events and advances the cursor.
  /// Re-observed events are dropped; the window may overlap previous ones
  /// arbitrarily.
  pub fn absorb(
    &mut self,
    window: impl IntoIterator<Item = WorkflowEvent>,
  ) -> Vec<WorkflowEvent> {
    let mut fresh = Vec::new();
    for event in window {
      let seen = self.last_seen.is_some_and(|seq| event.sequence <= seq);
      if seen {
        continue;
      }
      self.last_seen = Some(event.sequence);
      fresh.push(event);
    }
    fresh
  }
}
