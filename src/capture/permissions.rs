//! Microphone permission handling
//!
//! `check` is a synchronous preflight. `request` shows the prompt and
//! resolves whenever the answer arrives, which may be long after the call
//! that triggered it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::events::{emit_logged, EventDispatcher, PERMISSION_REQUESTED_EVENT};

/// Outcome of a permission check or prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Never asked, or the prompt was abandoned without an answer
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

/// Asks the OS for microphone access
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Check if microphone permission is granted
    fn check(&self) -> PermissionStatus;

    /// Request microphone permission.
    ///
    /// This will prompt the user if permission has not been granted yet.
    async fn request(&self) -> PermissionStatus;
}

/// A gate with a fixed answer.
///
/// Desktop platforms that enforce microphone access when the device is
/// opened use `granted()`.
pub struct StaticPermissionGate {
    status: PermissionStatus,
}

impl StaticPermissionGate {
    pub fn granted() -> Self {
        Self {
            status: PermissionStatus::Granted,
        }
    }

    pub fn denied() -> Self {
        Self {
            status: PermissionStatus::Denied,
        }
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    fn check(&self) -> PermissionStatus {
        self.status
    }

    async fn request(&self) -> PermissionStatus {
        self.status
    }
}

#[derive(Default)]
struct PromptState {
    granted: bool,
    waiting: Option<oneshot::Sender<bool>>,
}

/// A prompt shown and answered by the host application.
///
/// `request` emits `PermissionRequested` and waits for [`resolve`]. A grant
/// is remembered for the lifetime of the gate; a denial is not, so the next
/// request prompts again.
///
/// [`resolve`]: PromptPermissionGate::resolve
pub struct PromptPermissionGate {
    state: Mutex<PromptState>,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl PromptPermissionGate {
    pub fn new(dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            state: Mutex::new(PromptState::default()),
            dispatcher,
        }
    }

    /// Deliver the user's answer.
    ///
    /// Returns true if a prompt was waiting for it.
    pub fn resolve(&self, granted: bool) -> bool {
        let waiting = {
            let mut state = self.state.lock();
            if granted {
                state.granted = true;
            }
            state.waiting.take()
        };

        match waiting {
            Some(tx) => tx.send(granted).is_ok(),
            None => {
                tracing::debug!(granted, "Permission answer arrived with no prompt open");
                false
            }
        }
    }

    /// Whether a prompt is currently open
    pub fn is_prompting(&self) -> bool {
        self.state
            .lock()
            .waiting
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl PermissionGate for PromptPermissionGate {
    fn check(&self) -> PermissionStatus {
        if self.state.lock().granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Undetermined
        }
    }

    async fn request(&self) -> PermissionStatus {
        let rx = {
            let mut state = self.state.lock();
            if state.granted {
                return PermissionStatus::Granted;
            }
            let (tx, rx) = oneshot::channel();
            if state.waiting.replace(tx).is_some() {
                tracing::debug!("Replacing an unanswered microphone prompt");
            }
            rx
        };

        tracing::info!("Requesting microphone permission");
        emit_logged(
            self.dispatcher.as_ref(),
            PERMISSION_REQUESTED_EVENT,
            &json!({ "permission": "microphone" }),
        );

        match rx.await {
            Ok(true) => PermissionStatus::Granted,
            Ok(false) => PermissionStatus::Denied,
            Err(_) => {
                tracing::debug!("Microphone prompt abandoned");
                PermissionStatus::Undetermined
            }
        }
    }
}
