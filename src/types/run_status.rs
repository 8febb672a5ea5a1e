//! Coarse run state exposed on run handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse state of a run. `PendingRequests` is distinct from `Running`: it
/// means one or more human-in-the-loop requests are outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  PendingRequests,
  /// Halted at a superstep boundary with a checkpoint; resumable.
  Suspended,
  Completed,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
    )
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunStatus::Running => write!(f, "running"),
      RunStatus::PendingRequests => write!(f, "pending_requests"),
      RunStatus::Suspended => write!(f, "suspended"),
      RunStatus::Completed => write!(f, "completed"),
      RunStatus::Failed => write!(f, "failed"),
      RunStatus::Cancelled => write!(f, "cancelled"),
    }
  }
}
