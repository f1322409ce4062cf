//! Capture trait definitions
//!
//! Platform-agnostic contract for a single microphone capture session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Live state reported by a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    /// Nothing is being captured
    Idle,
    /// Audio is being written to the output
    Recording,
    /// Capture is suspended; the output is kept open for resume
    Paused,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingStatus {
    /// Whether a recording attempt is in progress (recording or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, RecordingStatus::Recording | RecordingStatus::Paused)
    }

    /// Wire name used at the bridge boundary
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Idle => "idle",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Paused => "paused",
        }
    }
}

/// Capture-related errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch encoder: {0}")]
    Launch(String),

    #[error("Encoder failed: {0}")]
    Encoder(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Options fixed when a capability is constructed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Keep capturing while the host application is in the background
    pub background: bool,
}

/// One underlying OS audio-capture session.
///
/// `pause`/`resume` are no-ops when not in the matching state, and
/// `release` must tolerate repeated calls and the idle state.
pub trait RecordingCapability: Send {
    /// Begin capture to a fresh output location.
    ///
    /// Returns `Ok(false)` when capture was refused (e.g. a session is
    /// already active) and `Err` when the underlying encoder failed.
    fn start(&mut self) -> CaptureResult<bool>;

    /// Suspend an active recording
    fn pause(&mut self);

    /// Continue a paused recording
    fn resume(&mut self);

    /// Finalize the output and end the session.
    ///
    /// Returns the absolute path of the finished file, or `None` when
    /// nothing was being captured or finalization failed.
    fn stop(&mut self) -> Option<PathBuf>;

    /// Current live state
    fn status(&self) -> RecordingStatus;

    /// Path of the most recently finalized recording
    fn last_recording_path(&self) -> Option<PathBuf>;

    /// Captured duration of the current (or last) recording in milliseconds
    fn duration_ms(&self) -> f64 {
        0.0
    }

    /// Free all underlying resources
    fn release(&mut self);
}

/// Builds the capability lazily on first use
pub trait CapabilityFactory: Send + Sync {
    fn create(&self, options: CaptureOptions) -> anyhow::Result<Box<dyn RecordingCapability>>;
}

impl<F> CapabilityFactory for F
where
    F: Fn(CaptureOptions) -> anyhow::Result<Box<dyn RecordingCapability>> + Send + Sync,
{
    fn create(&self, options: CaptureOptions) -> anyhow::Result<Box<dyn RecordingCapability>> {
        self(options)
    }
}
