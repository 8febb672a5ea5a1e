//! Pluggable checkpoint persistence with deep-copy save/load semantics.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::instrument;

use crate::types::Checkpoint;

#[derive(Debug, Error)]
pub enum CheckpointStoreError {
  #[error("checkpoint serialization failed: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("checkpoint io failed: {0}")]
  Io(#[from] std::io::Error),
}

/// Checkpoint storage. Implementations must deep-copy on save and load so
/// caller-side mutation of a returned checkpoint never corrupts stored state.
pub trait CheckpointStore: Send + Sync {
  fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError>;
  fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, CheckpointStoreError>;
  /// Checkpoint ids for the workflow, newest first.
  fn list(&self, workflow_id: &str) -> Result<Vec<String>, CheckpointStoreError>;
  fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointStoreError>;
}

struct StoredCheckpoint {
  workflow_id: String,
  created_at: DateTime<Utc>,
  json: String,
}

/// In-memory store. Holds serialized JSON, so loads never alias saved state.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
  inner: Mutex<HashMap<String, StoredCheckpoint>>,
}

impl InMemoryCheckpointStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CheckpointStore for InMemoryCheckpointStore {
  fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
    let json = serde_json::to_string(checkpoint)?;
    let mut inner = self.inner.lock().expect("checkpoint store poisoned");
    inner.insert(
      checkpoint.checkpoint_id.clone(),
      StoredCheckpoint {
        workflow_id: checkpoint.workflow_id.clone(),
        created_at: checkpoint.created_at,
        json,
      },
    );
    Ok(())
  }

  fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
    let inner = self.inner.lock().expect("checkpoint store poisoned");
    match inner.get(checkpoint_id) {
      Some(stored) => Ok(Some(serde_json::from_str(&stored.json)?)),
      None => Ok(None),
    }
  }

  fn list(&self, workflow_id: &str) -> Result<Vec<String>, CheckpointStoreError> {
    let inner = self.inner.lock().expect("checkpoint store poisoned");
    let mut entries: Vec<(&String, &StoredCheckpoint)> = inner
      .iter()
      .filter(|(_, stored)| stored.workflow_id == workflow_id)
      .collect();
    entries.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then(b.0.cmp(a.0)));
    Ok(entries.into_iter().map(|(id, _)| id.clone()).collect())
  }

  fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointStoreError> {
    let mut inner = self.inner.lock().expect("checkpoint store poisoned");
    inner.remove(checkpoint_id);
    Ok(())
  }
}

/// Filesystem store: one `<checkpoint_id>.json` per checkpoint under a
/// directory, created on first save.
pub struct FsCheckpointStore {
  dir: PathBuf,
}

impl FsCheckpointStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn path_for(&self, checkpoint_id: &str) -> PathBuf {
    self.dir.join(format!("{}.json", checkpoint_id))
  }

  fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointStoreError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
  }
}

impl CheckpointStore for FsCheckpointStore {
  #[instrument(level = "trace", skip(self, checkpoint))]
  fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
    let json = serde_json::to_string_pretty(checkpoint)?;
    std::fs::create_dir_all(&self.dir)?;
    std::fs::write(self.path_for(&checkpoint.checkpoint_id), json)?;
    Ok(())
  }

  fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
    let path = self.path_for(checkpoint_id);
    if !path.exists() {
      return Ok(None);
    }
    Ok(Some(Self::read_checkpoint(&path)?))
  }

  fn list(&self, workflow_id: &str) -> Result<Vec<String>, CheckpointStoreError> {
    if !self.dir.exists() {
      return Ok(Vec::new());
    }
    let mut entries: Vec<(DateTime<Utc>, String)> = Vec::new();
    for dir_entry in std::fs::read_dir(&self.dir)? {
      let path = dir_entry?.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      let Ok(checkpoint) = Self::read_checkpoint(&path) else {
        continue;
      };
      if checkpoint.workflow_id == workflow_id {
        entries.push((checkpoint.created_at, checkpoint.checkpoint_id));
      }
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    Ok(entries.into_iter().map(|(_, id)| id).collect())
  }

  fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointStoreError> {
    let path = self.path_for(checkpoint_id);
    if path.exists() {
      std::fs::remove_file(path)?;
    }
    Ok(())
  }
}
