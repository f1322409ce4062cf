//! Recording state management
//!
//! Defines the lifecycle states, capture segments and the request metadata
//! that must outlive the call that started a recording.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::capture::RecordingStatus;
use crate::events::RECORDED_EVENT;

/// Coordinator lifecycle as observed from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No attempt in progress
    Idle,
    /// Waiting on the OS microphone prompt
    PermissionPending,
    /// Capability is being constructed/started
    Starting,
    /// Capturing audio
    Recording,
    /// Capture suspended
    Paused,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Idle
    }
}

impl From<RecordingStatus> for LifecycleState {
    fn from(status: RecordingStatus) -> Self {
        match status {
            RecordingStatus::Idle => LifecycleState::Idle,
            RecordingStatus::Recording => LifecycleState::Recording,
            RecordingStatus::Paused => LifecycleState::Paused,
        }
    }
}

/// One continuous stretch of capture.
///
/// A new session is created each time recording is resumed after a pause.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    /// Session index (0, 1, 2, ...)
    pub index: usize,

    /// Duration of this session in milliseconds
    pub duration_ms: f64,

    /// Monotonic start of the session
    started_at: Instant,

    /// Unix timestamp when session started
    pub unix_start_ms: u64,

    /// Unix timestamp when session ended
    pub unix_end_ms: Option<u64>,
}

impl RecordingSession {
    /// Create a new session starting now
    pub fn new(index: usize) -> Self {
        Self {
            index,
            duration_ms: 0.0,
            started_at: Instant::now(),
            unix_start_ms: Utc::now().timestamp_millis() as u64,
            unix_end_ms: None,
        }
    }

    /// End the session
    pub fn end(&mut self) {
        if self.unix_end_ms.is_some() {
            return;
        }
        self.duration_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        self.unix_end_ms = Some(Utc::now().timestamp_millis() as u64);
    }

    /// Whether the session is still running
    pub fn is_open(&self) -> bool {
        self.unix_end_ms.is_none()
    }

    /// Elapsed time, live for an open session
    pub fn elapsed_ms(&self) -> f64 {
        if self.is_open() {
            self.started_at.elapsed().as_secs_f64() * 1000.0
        } else {
            self.duration_ms
        }
    }
}

/// Metadata about an in-flight recording attempt.
///
/// Persisted so that `stop` can recover the tracking id and target event
/// even after the permission round-trip outlived the original call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Caller-supplied tracking identifier
    #[serde(rename = "pending_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Event raised when the recording completes
    #[serde(rename = "pending_event", default = "default_event_name")]
    pub event: String,

    /// Set while the microphone prompt for this request is unanswered
    #[serde(
        rename = "pending_awaiting_permission",
        default,
        skip_serializing_if = "is_false"
    )]
    pub awaiting_permission: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_event_name() -> String {
    RECORDED_EVENT.to_string()
}

impl PendingRequest {
    pub fn new(id: Option<String>, event: impl Into<String>) -> Self {
        Self {
            id,
            event: event.into(),
            awaiting_permission: false,
        }
    }
}

/// Parameters of a start request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Tracking identifier echoed back in the terminal event
    #[serde(default)]
    pub id: Option<String>,

    /// Event name to raise on completion
    #[serde(default)]
    pub event: Option<String>,

    /// Override for background capture when the capability is created
    #[serde(default)]
    pub background: Option<bool>,
}

impl StartRequest {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// What `request_start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Already recording, paused or awaiting permission; nothing happened
    Suppressed,
    /// The OS prompt must be issued; the flow continues on the permission result
    PermissionRequested,
    /// Capture started
    Started,
    /// The attempt ended with a `Cancelled` event
    Cancelled,
}
