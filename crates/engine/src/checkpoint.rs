//! Checkpoint persistence.
//!
//! A checkpoint directory holds one `.pipeline_checkpoint.json` document recording the
//! latest status of every step. The orchestrator consults it to skip completed work on
//! resume and writes it on every step transition.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use rnaflow_types::{CheckpointDocument, CheckpointEntry, StepStatus};
use rnaflow_util::{remove_if_exists, write_atomic};

use crate::error::CheckpointError;

/// File name of the checkpoint document inside a checkpoint directory.
pub const CHECKPOINT_FILE_NAME: &str = ".pipeline_checkpoint.json";

/// Shared trait implemented by checkpoint backends.
pub trait CheckpointStore {
    /// Current state of every recorded step.
    fn document(&self) -> &CheckpointDocument;

    /// Overwrite the record for `step`. Returns only after the new state is durable.
    fn save(&mut self, step: &str, status: StepStatus, metadata: Option<Map<String, Value>>) -> Result<(), CheckpointError>;

    /// Drop every record, including the backing file if any.
    fn clear(&mut self) -> Result<(), CheckpointError>;

    /// `true` only when `step` is recorded as completed. Running and failed steps are re-run.
    fn should_skip(&self, step: &str) -> bool {
        self.document().status_of(step).is_completed()
    }

    fn last_completed_step(&self) -> Option<String> {
        self.document().last_completed_step.clone()
    }

    fn status_of(&self, step: &str) -> StepStatus {
        self.document().status_of(step)
    }

    fn entry(&self, step: &str) -> Option<&CheckpointEntry> {
        self.document().steps.get(step)
    }
}

/// JSON-backed checkpoint store rooted at a checkpoint directory.
#[derive(Debug)]
pub struct JsonCheckpointStore {
    path: PathBuf,
    document: CheckpointDocument,
}

impl JsonCheckpointStore {
    /// Open the store for `checkpoint_dir`, loading any existing document.
    ///
    /// A missing file yields an empty store. An unreadable or unparsable file is an error.
    pub fn open(checkpoint_dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = checkpoint_dir.as_ref().join(CHECKPOINT_FILE_NAME);
        let document = load_checkpoint_file(&path)?;
        debug!(path = %path.display(), steps = document.steps.len(), "opened checkpoint store");
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the document from disk, discarding the in-memory copy.
    pub fn reload(&mut self) -> Result<(), CheckpointError> {
        self.document = load_checkpoint_file(&self.path)?;
        Ok(())
    }

    fn persist(&self, document: &CheckpointDocument) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        write_atomic(&self.path, &bytes).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn document(&self) -> &CheckpointDocument {
        &self.document
    }

    fn save(&mut self, step: &str, status: StepStatus, metadata: Option<Map<String, Value>>) -> Result<(), CheckpointError> {
        let mut next = self.document.clone();
        next.record(step, status, metadata.unwrap_or_default(), Utc::now());
        self.persist(&next)?;
        self.document = next;
        debug!(step, status = %status, path = %self.path.display(), "saved checkpoint");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        let removed = remove_if_exists(&self.path).map_err(|source| self.io_error(source))?;
        self.document = CheckpointDocument::default();
        info!(path = %self.path.display(), removed, "cleared checkpoints");
        Ok(())
    }
}

/// In-memory checkpoint store primarily used for unit testing.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    document: CheckpointDocument,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: CheckpointDocument) -> Self {
        Self { document }
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn document(&self) -> &CheckpointDocument {
        &self.document
    }

    fn save(&mut self, step: &str, status: StepStatus, metadata: Option<Map<String, Value>>) -> Result<(), CheckpointError> {
        self.document.record(step, status, metadata.unwrap_or_default(), Utc::now());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        self.document = CheckpointDocument::default();
        Ok(())
    }
}

/// Read the checkpoint document for `checkpoint_dir` without opening a store.
pub fn load_checkpoint(checkpoint_dir: impl AsRef<Path>) -> Result<CheckpointDocument, CheckpointError> {
    load_checkpoint_file(&checkpoint_dir.as_ref().join(CHECKPOINT_FILE_NAME))
}

/// Delete the checkpoint file for `checkpoint_dir` without parsing it, so a corrupt file can be discarded.
///
/// Returns whether a file was removed.
pub fn discard_checkpoint(checkpoint_dir: impl AsRef<Path>) -> Result<bool, CheckpointError> {
    let path = checkpoint_dir.as_ref().join(CHECKPOINT_FILE_NAME);
    let removed = remove_if_exists(&path).map_err(|source| CheckpointError::Io { path: path.clone(), source })?;
    info!(path = %path.display(), removed, "discarded checkpoint file");
    Ok(removed)
}

fn load_checkpoint_file(path: &Path) -> Result<CheckpointDocument, CheckpointError> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str::<CheckpointDocument>(&content).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(CheckpointDocument::default()),
        Err(source) => Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
