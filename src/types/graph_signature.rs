//! Deterministic graph signature hashing and checkpoint compatibility.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;
use thiserror::Error;

use super::WorkflowGraph;

/// Bumped when the canonical serialization changes shape.
pub const SIGNATURE_VERSION: u32 = 1;

/// Deterministic hash over a graph's structure, used purely to detect
/// checkpoint/graph incompatibility, never for identity.
///
/// Component hashes and counts exist so a mismatch can be described by broad
/// category without storing the whole graph in the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSignature {
  pub version: u32,
  pub hash: String,
  pub executors_hash: String,
  pub edges_hash: String,
  pub entry_hash: String,
  pub executor_count: usize,
  pub edge_count: usize,
}

/// Broad category of structural change between two signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureChange {
  ExecutorAdded,
  ExecutorRemoved,
  ExecutorModified,
  EdgeAdded,
  EdgeRemoved,
  EdgeModified,
  EntryChanged,
}

impl fmt::Display for SignatureChange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SignatureChange::ExecutorAdded => "executor added",
      SignatureChange::ExecutorRemoved => "executor removed",
      SignatureChange::ExecutorModified => "executor modified",
      SignatureChange::EdgeAdded => "edge added",
      SignatureChange::EdgeRemoved => "edge removed",
      SignatureChange::EdgeModified => "edge modified",
      SignatureChange::EntryChanged => "entry changed",
    };
    f.write_str(s)
  }
}

/// How [GraphSignature::compatible] treats detected changes.
#[derive(Debug, Clone, Default)]
pub enum CompatibilityMode {
  /// Byte-equality of the whole hash. The default.
  #[default]
  Strict,
  /// Tolerate the listed change categories; anything else is incompatible.
  AllowList(Vec<SignatureChange>),
}

/// A checkpoint's signature does not match the graph that would resume it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("checkpoint signature does not match the current graph ({description})")]
pub struct SignatureMismatch {
  pub description: String,
  pub changes: Vec<SignatureChange>,
}

fn hex_digest(input: &str) -> String {
  let digest = Sha256::digest(input.as_bytes());
  digest.iter().fold(String::with_capacity(64), |mut out, b| {
    let _ = write!(out, "{:02x}", b);
    out
  })
}

impl GraphSignature {
  /// Computes the signature: executors sorted by id, edge canonical forms
  /// sorted, plus the entry id. Two structurally identical graphs hash
  /// identically regardless of construction order.
  pub fn of(graph: &WorkflowGraph) -> Self {
    let mut executors: Vec<String> = graph
      .executors()
      .values()
      .map(|e| format!("{}\x1f{}\x1f{}", e.id(), e.input_signature(), e.output_signature()))
      .collect();
    executors.sort_unstable();

    let mut edges: Vec<String> = graph.edges().iter().map(|e| e.canonical()).collect();
    edges.sort_unstable();

    let executors_hash = hex_digest(&executors.join("\n"));
    let edges_hash = hex_digest(&edges.join("\n"));
    let entry_hash = hex_digest(graph.entry());
    let hash = hex_digest(&format!(
      "v{}\n{}\n{}\n{}",
      SIGNATURE_VERSION, executors_hash, edges_hash, entry_hash
    ));

    Self {
      version: SIGNATURE_VERSION,
      hash,
      executors_hash,
      edges_hash,
      entry_hash,
      executor_count: graph.executors().len(),
      edge_count: graph.edges().len(),
    }
  }

  /// Broad categories of change from `self` (the recorded signature) to
  /// `current`. Empty only when the hashes agree or the difference cannot be
  /// classified (e.g. a version bump).
  pub fn diff(&self, current: &Self) -> Vec<SignatureChange> {
    let mut changes = Vec::new();
    if self.executors_hash != current.executors_hash {
      changes.push(match current.executor_count.cmp(&self.executor_count) {
        std::cmp::Ordering::Greater => SignatureChange::ExecutorAdded,
        std::cmp::Ordering::Less => SignatureChange::ExecutorRemoved,
        std::cmp::Ordering::Equal => SignatureChange::ExecutorModified,
      });
    }
    if self.edges_hash != current.edges_hash {
      changes.push(match current.edge_count.cmp(&self.edge_count) {
        std::cmp::Ordering::Greater => SignatureChange::EdgeAdded,
        std::cmp::Ordering::Less => SignatureChange::EdgeRemoved,
        std::cmp::Ordering::Equal => SignatureChange::EdgeModified,
      });
    }
    if self.entry_hash != current.entry_hash {
      changes.push(SignatureChange::EntryChanged);
    }
    changes
  }

  /// Checks whether a run checkpointed under `self` may resume on a graph
  /// with signature `current`. Strict mode requires byte-equality; the
  /// allow-list mode tolerates only the listed categories. The error always
  /// carries a description of the suspected change.
  pub fn compatible(
    &self,
    current: &Self,
    mode: &CompatibilityMode,
  ) -> Result<(), SignatureMismatch> {
    if self.hash == current.hash {
      return Ok(());
    }
    let changes = self.diff(current);
    let description = if changes.is_empty() {
      if self.version != current.version {
        format!(
          "signature version changed from {} to {}",
          self.version, current.version
        )
      } else {
        "unclassified structural change".to_string()
      }
    } else {
      changes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
    };
    match mode {
      CompatibilityMode::Strict => Err(SignatureMismatch {
        description,
        changes,
      }),
      CompatibilityMode::AllowList(allowed) => {
        if !changes.is_empty() && changes.iter().all(|c| allowed.contains(c)) {
          Ok(())
        } else {
          Err(SignatureMismatch {
            description,
            changes,
          })
        }
      }
    }
  }
}
