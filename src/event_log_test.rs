//! Tests for the event log and the incremental cursor.

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

use crate::event_log::{EventLog, IncrementalCursor};
use crate::types::{WorkflowEvent, WorkflowEventKind};

fn progress(executor_id: &str) -> WorkflowEventKind {
  WorkflowEventKind::ExecutorProgress {
    executor_id: executor_id.to_string(),
    payload: json!(null),
  }
}

#[test]
fn sequences_are_strictly_increasing_from_zero() {
  let log = EventLog::new();
  assert_eq!(log.append(progress("a")).sequence, 0);
  assert_eq!(log.append(progress("b")).sequence, 1);
  assert_eq!(log.append(progress("c")).sequence, 2);
  let snapshot = log.snapshot();
  assert_eq!(snapshot.len(), 3);
  assert!(snapshot.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[test]
fn preload_continues_the_sequence() {
  let events = vec![
    WorkflowEvent::new(0, progress("a")),
    WorkflowEvent::new(1, progress("b")),
  ];
  let log = EventLog::preload(events);
  assert_eq!(log.append(progress("c")).sequence, 2);
}

#[test]
fn events_after_filters_strictly() {
  let log = EventLog::new();
  log.append(progress("a"));
  log.append(progress("b"));
  log.append(progress("c"));
  assert_eq!(log.events_after(None).len(), 3);
  let tail = log.events_after(Some(0));
  assert_eq!(tail.len(), 2);
  assert_eq!(tail[0].sequence, 1);
  assert!(log.events_after(Some(2)).is_empty());
}

#[test]
fn append_terminal_seals_the_log() {
  let log = EventLog::new();
  log.append(progress("a"));
  let terminal = log.append_terminal(WorkflowEventKind::WorkflowCompleted {
    output: json!("done"),
  });
  assert!(terminal.is_terminal());
  assert!(log.is_sealed());
}

#[tokio::test]
async fn stream_drains_live_appends_then_ends_at_seal() {
  let log = Arc::new(EventLog::new());
  log.append(progress("before"));

  let stream_log = Arc::clone(&log);
  let collector = tokio::spawn(async move {
    stream_log.stream().collect::<Vec<_>>().await
  });

  // Give the collector a chance to drain and park.
  tokio::task::yield_now().await;
  log.append(progress("during"));
  log.append_terminal(WorkflowEventKind::WorkflowCompleted {
    output: json!(null),
  });

  let collected = collector.await.expect("collector");
  assert_eq!(collected.len(), 3);
  assert_eq!(collected.last().map(|e| e.is_terminal()), Some(true));
}

#[tokio::test]
async fn stream_is_restartable_and_replays_from_the_start() {
  let log = Arc::new(EventLog::new());
  log.append(progress("a"));
  log.append_terminal(WorkflowEventKind::WorkflowCompleted {
    output: json!(null),
  });
  let first: Vec<WorkflowEvent> = log.stream().collect().await;
  let second: Vec<WorkflowEvent> = log.stream().collect().await;
  assert_eq!(first, second);
  let tail: Vec<WorkflowEvent> = log.stream_after(Some(0)).collect().await;
  assert_eq!(tail.len(), 1);
}

#[test]
fn cursor_deduplicates_overlapping_windows() {
  let e1 = WorkflowEvent::new(0, progress("a"));
  let e2 = WorkflowEvent::new(1, progress("b"));
  let e3 = WorkflowEvent::new(2, progress("c"));
  let terminal = WorkflowEvent::new(
    3,
    WorkflowEventKind::WorkflowCompleted {
      output: json!("out"),
    },
  );

  let mut cursor = IncrementalCursor::new();
  let mut seen = Vec::new();
  seen.extend(cursor.absorb(vec![e1.clone()]));
  seen.extend(cursor.absorb(vec![e1.clone(), e2.clone()]));
  seen.extend(cursor.absorb(vec![e1.clone(), e2.clone(), e3.clone()]));
  seen.extend(cursor.absorb(vec![e1.clone(), e2.clone(), e3.clone(), terminal.clone()]));

  let sequences: Vec<u64> = seen.iter().map(|e| e.sequence).collect();
  assert_eq!(sequences, vec![0, 1, 2, 3]);
  assert_eq!(cursor.last_seen(), Some(3));
}

#[test]
fn cursor_resume_from_skips_already_seen() {
  let mut cursor = IncrementalCursor::resume_from(Some(1));
  let fresh = cursor.absorb(vec![
    WorkflowEvent::new(0, progress("a")),
    WorkflowEvent::new(1, progress("b")),
    WorkflowEvent::new(2, progress("c")),
  ]);
  assert_eq!(fresh.len(), 1);
  assert_eq!(fresh[0].sequence, 2);
}
