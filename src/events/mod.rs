//! Lifecycle events delivered to the calling application
//!
//! The coordinator hands a name and a structured payload to an
//! [`EventDispatcher`]; transport and serialization to the remote side are
//! the dispatcher's concern.

#[cfg(feature = "tauri-bridge")]
pub mod tauri_emitter;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default event raised when a recording finishes
pub const RECORDED_EVENT: &str = "Recorded";

/// Event raised when an attempt ends without a recording
pub const CANCELLED_EVENT: &str = "Cancelled";

/// Event asking the host to show the microphone prompt
pub const PERMISSION_REQUESTED_EVENT: &str = "PermissionRequested";

/// MIME type reported for finished recordings
pub const RECORDING_MIME_TYPE: &str = "audio/m4a";

/// Payload of the completion event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPayload {
    pub path: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl RecordedPayload {
    pub fn new(path: String, id: Option<String>) -> Self {
        Self {
            path,
            mime_type: RECORDING_MIME_TYPE.to_string(),
            id,
        }
    }
}

/// Why an attempt was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    PermissionDenied,
    StartFailed,
}

/// Payload of the `Cancelled` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledPayload {
    pub cancelled: bool,
    pub reason: CancelReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl CancelledPayload {
    pub fn new(reason: CancelReason, id: Option<String>) -> Self {
        Self {
            cancelled: true,
            reason,
            id,
        }
    }
}

/// A named event with its JSON payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingEvent {
    pub name: String,
    pub payload: Value,
}

/// Event delivery errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Delivers events to the remote application.
///
/// Delivery is best-effort: callers log failures and carry on.
pub trait EventDispatcher: Send + Sync {
    /// Deliver `payload` under `event`
    fn emit(&self, event: &str, payload: &Value) -> Result<(), DispatchError>;

    /// Show a user-visible failure notice when no event can carry it
    fn notify(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Restrict an event name to `A-Z a-z 0-9 - / : _`.
///
/// Webview event systems reject anything else, so a caller-supplied name
/// such as `com.example.MemoRecorded` is delivered as
/// `com_example_MemoRecorded`.
pub fn portable_event_name(name: &str) -> Cow<'_, str> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | ':' | '_');
    if name.chars().all(allowed) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(
            name.chars()
                .map(|c| if allowed(c) { c } else { '_' })
                .collect(),
        )
    }
}

/// Serialize and emit, logging instead of failing
pub fn emit_logged<T: Serialize>(dispatcher: &dyn EventDispatcher, event: &str, payload: &T) {
    let value = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(event, "Failed to serialize event payload: {}", e);
            return;
        }
    };

    match dispatcher.emit(event, &value) {
        Ok(()) => tracing::debug!(event, "Event dispatched"),
        Err(e) => tracing::warn!(event, "Failed to dispatch event: {}", e),
    }
}

/// In-process delivery over a tokio broadcast channel
pub struct BroadcastDispatcher {
    tx: broadcast::Sender<RecordingEvent>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventDispatcher for BroadcastDispatcher {
    fn emit(&self, event: &str, payload: &Value) -> Result<(), DispatchError> {
        let event = RecordingEvent {
            name: event.to_string(),
            payload: payload.clone(),
        };
        if self.tx.send(event).is_err() {
            tracing::debug!("No in-process subscribers for event");
        }
        Ok(())
    }
}

/// Sends every event to each sink in turn
#[derive(Default)]
pub struct FanoutDispatcher {
    sinks: Vec<Arc<dyn EventDispatcher>>,
}

impl FanoutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventDispatcher>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventDispatcher for FanoutDispatcher {
    fn emit(&self, event: &str, payload: &Value) -> Result<(), DispatchError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event, payload) {
                tracing::warn!(event, "Event sink failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn notify(&self, message: &str) {
        for sink in &self.sinks {
            sink.notify(message);
        }
    }
}
