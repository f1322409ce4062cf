//! Event delivery through the Tauri event system

use super::{portable_event_name, DispatchError, EventDispatcher};
use serde_json::Value;
use tauri::{AppHandle, Emitter, Runtime};

/// Emits lifecycle events to every webview of the app.
///
/// Names are passed through [`portable_event_name`] first, since Tauri
/// refuses names outside `A-Z a-z 0-9 - / : _`.
pub struct TauriDispatcher<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> TauriDispatcher<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self { app }
    }
}

impl<R: Runtime> EventDispatcher for TauriDispatcher<R> {
    fn emit(&self, event: &str, payload: &Value) -> Result<(), DispatchError> {
        let name = portable_event_name(event);
        if name != event {
            tracing::debug!(event, mapped = %name, "Event name mapped for Tauri");
        }
        self.app
            .emit(&name, payload)
            .map_err(|e| DispatchError::Transport(e.to_string()))
    }
}
