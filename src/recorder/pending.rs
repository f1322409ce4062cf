//! Durable storage for the pending recording request
//!
//! Exactly one record is live at a time. The file backend stores it as
//! `<state_dir>/microphone_recording.json`:
//!
//! ```json
//! { "pending_id": "memo-1", "pending_event": "Recorded" }
//! ```

use super::state::PendingRequest;
use crate::config::NAMESPACE;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Store-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single durable slot for the in-flight request
pub trait PendingStore: Send {
    /// Write the record, replacing any previous one
    fn save(&mut self, request: &PendingRequest) -> StoreResult<()>;

    /// Read the record without consuming it
    fn load(&self) -> StoreResult<Option<PendingRequest>>;

    /// Remove the record
    fn clear(&mut self) -> StoreResult<()>;

    /// Read and remove the record
    fn take(&mut self) -> StoreResult<Option<PendingRequest>> {
        let request = self.load()?;
        if request.is_some() {
            self.clear()?;
        }
        Ok(request)
    }
}

/// Pending request persisted as a JSON file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store under `state_dir`, using the fixed namespace as file name
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(format!("{}.json", NAMESPACE)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PendingStore for JsonFileStore {
    fn save(&mut self, request: &PendingRequest) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a half-written record
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(request)?)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!("Saved pending request to {:?}", self.path);
        Ok(())
    }

    fn load(&self) -> StoreResult<Option<PendingRequest>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn clear(&mut self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store; clones share the same slot
#[derive(Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<PendingRequest>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingStore for MemoryStore {
    fn save(&mut self, request: &PendingRequest) -> StoreResult<()> {
        *self.slot.lock() = Some(request.clone());
        Ok(())
    }

    fn load(&self) -> StoreResult<Option<PendingRequest>> {
        Ok(self.slot.lock().clone())
    }

    fn clear(&mut self) -> StoreResult<()> {
        *self.slot.lock() = None;
        Ok(())
    }

    fn take(&mut self) -> StoreResult<Option<PendingRequest>> {
        Ok(self.slot.lock().take())
    }
}
