//! Recording coordinator
//!
//! Runs the permission → start → pause/resume → stop lifecycle against a
//! single lazily-created capture capability, persisting the in-flight
//! request so the terminal event can be raised with the right name and id.
//!
//! The coordinator is a plain state machine with `&mut self` operations.
//! It must be driven from one execution context; see
//! [`RecorderService`](super::service::RecorderService).

use super::pending::PendingStore;
use super::state::{LifecycleState, PendingRequest, StartOutcome, StartRequest};
use crate::capture::{
    CapabilityFactory, CaptureOptions, PermissionGate, RecordingCapability, RecordingStatus,
};
use crate::events::{
    emit_logged, CancelReason, CancelledPayload, EventDispatcher, RecordedPayload,
    CANCELLED_EVENT, RECORDED_EVENT,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Internal progress of a start attempt.
///
/// Recording/paused are not tracked here; the capability is the only
/// source of truth for those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Ready,
    AwaitingPermission,
    Starting,
}

/// Serializes recording requests against one capture capability
pub struct RecordingCoordinator {
    /// Created on first start, kept until released
    capability: Option<Box<dyn RecordingCapability>>,

    factory: Box<dyn CapabilityFactory>,

    gate: Arc<dyn PermissionGate>,

    store: Box<dyn PendingStore>,

    dispatcher: Arc<dyn EventDispatcher>,

    /// Event used when a start request names none
    default_event: String,

    /// Background capture when a request does not say
    background_default: bool,

    /// Background flag of the current capability
    capture_options: CaptureOptions,

    flow: Flow,

    /// In-memory copy of the attempt being started
    request: Option<PendingRequest>,

    /// Background flag requested by the attempt being started
    requested_background: Option<bool>,

    /// The current pause was caused by the host being suspended
    paused_by_host: bool,
}

impl RecordingCoordinator {
    pub fn new(
        factory: Box<dyn CapabilityFactory>,
        gate: Arc<dyn PermissionGate>,
        store: Box<dyn PendingStore>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            capability: None,
            factory,
            gate,
            store,
            dispatcher,
            default_event: RECORDED_EVENT.to_string(),
            background_default: false,
            capture_options: CaptureOptions::default(),
            flow: Flow::Ready,
            request: None,
            requested_background: None,
            paused_by_host: false,
        }
    }

    /// Event raised on completion when a request names none
    pub fn with_default_event(mut self, event: impl Into<String>) -> Self {
        self.default_event = event.into();
        self
    }

    /// Whether capture continues while the host is suspended, unless a
    /// request overrides it
    pub fn with_background(mut self, background: bool) -> Self {
        self.background_default = background;
        self
    }

    /// Live capture status; idle when no capability exists yet
    pub fn status(&self) -> RecordingStatus {
        self.capability
            .as_ref()
            .map(|c| c.status())
            .unwrap_or_default()
    }

    /// Lifecycle including the permission and starting phases
    pub fn state(&self) -> LifecycleState {
        match self.flow {
            Flow::AwaitingPermission => LifecycleState::PermissionPending,
            Flow::Starting => LifecycleState::Starting,
            Flow::Ready => self.status().into(),
        }
    }

    /// Path of the most recently finished recording
    pub fn last_recording(&self) -> Option<PathBuf> {
        self.capability
            .as_ref()
            .and_then(|c| c.last_recording_path())
    }

    /// Captured duration of the current (or last) recording
    pub fn duration_ms(&self) -> f64 {
        self.capability
            .as_ref()
            .map(|c| c.duration_ms())
            .unwrap_or(0.0)
    }

    /// Begin a recording attempt.
    ///
    /// A request arriving while recording, paused or waiting on the
    /// permission prompt is dropped without side effects. When permission
    /// is missing the caller must issue the prompt and later call
    /// [`on_permission_result`](Self::on_permission_result).
    pub fn request_start(&mut self, request: StartRequest) -> StartOutcome {
        if self.flow != Flow::Ready || self.status().is_active() {
            tracing::debug!(id = ?request.id, state = ?self.state(), "Duplicate start ignored");
            return StartOutcome::Suppressed;
        }

        let event = request
            .event
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.default_event.clone());
        let granted = self.gate.check().is_granted();
        let mut pending = PendingRequest::new(request.id, event);
        pending.awaiting_permission = !granted;

        self.persist(&pending);
        self.request = Some(pending);
        self.requested_background = request.background;

        if granted {
            self.attempt_start()
        } else {
            tracing::info!("Waiting for microphone permission");
            self.flow = Flow::AwaitingPermission;
            StartOutcome::PermissionRequested
        }
    }

    /// Continue a start attempt once the permission prompt is answered.
    ///
    /// Also accepted after a process restart, when the durable store still
    /// holds a request marked as waiting on the prompt. Any other record
    /// belongs to an attempt that already got past permission.
    pub fn on_permission_result(&mut self, granted: bool) -> StartOutcome {
        if self.flow != Flow::AwaitingPermission {
            if self.flow == Flow::Starting || self.status().is_active() {
                tracing::debug!("Permission result ignored: attempt already running");
                return StartOutcome::Suppressed;
            }
            match self.store.load() {
                Ok(Some(pending)) if pending.awaiting_permission => {
                    tracing::info!(id = ?pending.id, "Resuming pending request after restart");
                    self.request = Some(pending);
                }
                Ok(Some(pending)) => {
                    tracing::debug!(
                        id = ?pending.id,
                        "Permission result ignored: pending request was not prompted"
                    );
                    return StartOutcome::Suppressed;
                }
                Ok(None) => {
                    tracing::debug!("Permission result ignored: no pending request");
                    return StartOutcome::Suppressed;
                }
                Err(e) => {
                    tracing::warn!("Permission result ignored: {}", e);
                    return StartOutcome::Suppressed;
                }
            }
        }

        if granted {
            self.attempt_start()
        } else {
            tracing::info!("Microphone permission denied");
            let id = self.request.take().and_then(|r| r.id);
            self.cancel(CancelReason::PermissionDenied, id);
            StartOutcome::Cancelled
        }
    }

    fn attempt_start(&mut self) -> StartOutcome {
        let id = self.request.as_ref().and_then(|r| r.id.clone());

        // The permission callback may race a start that already succeeded
        if self.status().is_active() {
            tracing::debug!(id = ?id, "Start skipped: already recording");
            self.flow = Flow::Ready;
            self.request = None;
            return StartOutcome::Suppressed;
        }

        // The prompt is answered; the record now only serves `request_stop`
        let answered = self
            .request
            .as_mut()
            .filter(|r| r.awaiting_permission)
            .map(|r| {
                r.awaiting_permission = false;
                r.clone()
            });
        if let Some(pending) = answered {
            self.persist(&pending);
        }

        self.flow = Flow::Starting;
        let started = match self.ensure_capability() {
            Ok(capability) => match capability.start() {
                Ok(true) => Ok(()),
                Ok(false) => Err("capture refused to start".to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(format!("failed to create capture: {:#}", e)),
        };

        self.flow = Flow::Ready;
        self.request = None;
        self.requested_background = None;

        match started {
            Ok(()) => {
                tracing::info!(id = ?id, "Recording started");
                StartOutcome::Started
            }
            Err(reason) => {
                tracing::error!(id = ?id, "Failed to start recording: {}", reason);
                self.cancel(CancelReason::StartFailed, id);
                StartOutcome::Cancelled
            }
        }
    }

    fn ensure_capability(&mut self) -> anyhow::Result<&mut Box<dyn RecordingCapability>> {
        match self.capability {
            Some(ref mut capability) => Ok(capability),
            None => {
                let options = CaptureOptions {
                    background: self.requested_background.unwrap_or(self.background_default),
                };
                let capability = self.factory.create(options)?;
                tracing::info!(background = options.background, "Capture capability created");
                self.capture_options = options;
                Ok(self.capability.insert(capability))
            }
        }
    }

    fn persist(&mut self, pending: &PendingRequest) {
        if let Err(e) = self.store.save(pending) {
            tracing::warn!("Failed to persist pending request: {}", e);
        }
    }

    /// End the attempt with a `Cancelled` event
    fn cancel(&mut self, reason: CancelReason, id: Option<String>) {
        self.flow = Flow::Ready;
        self.request = None;
        self.requested_background = None;

        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear pending request: {}", e);
        }

        emit_logged(
            self.dispatcher.as_ref(),
            CANCELLED_EVENT,
            &CancelledPayload::new(reason, id.clone()),
        );

        if reason == CancelReason::StartFailed && id.is_none() {
            self.dispatcher.notify("Recording could not be started");
        }
    }

    /// Pause an active recording; no-op otherwise
    pub fn request_pause(&mut self) {
        match self.capability.as_mut() {
            Some(capability) if capability.status() == RecordingStatus::Recording => {
                capability.pause();
                self.paused_by_host = false;
                tracing::info!("Recording paused");
            }
            Some(_) => tracing::debug!("Pause ignored: not recording"),
            None => tracing::debug!("Pause ignored: no capture session"),
        }
    }

    /// Resume a paused recording; no-op otherwise
    pub fn request_resume(&mut self) {
        match self.capability.as_mut() {
            Some(capability) if capability.status() == RecordingStatus::Paused => {
                capability.resume();
                self.paused_by_host = false;
                tracing::info!("Recording resumed");
            }
            Some(_) => tracing::debug!("Resume ignored: not paused"),
            None => tracing::debug!("Resume ignored: no capture session"),
        }
    }

    /// Finish the recording and raise the pending request's event.
    ///
    /// Returns the finished file, or `None` when nothing was recording or
    /// the capture produced no output (in which case no event is raised).
    pub fn request_stop(&mut self) -> Option<PathBuf> {
        let capability = match self.capability.as_mut() {
            Some(capability) if capability.status().is_active() => capability,
            _ => {
                tracing::debug!("Stop ignored: nothing recording");
                return None;
            }
        };

        let path = capability.stop();
        self.paused_by_host = false;

        let pending = match self.store.take() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("Failed to read pending request: {}", e);
                None
            }
        };

        let Some(path) = path else {
            tracing::warn!("Recording stopped without an output file");
            return None;
        };

        let pending =
            pending.unwrap_or_else(|| PendingRequest::new(None, self.default_event.clone()));
        tracing::info!(
            event = %pending.event,
            id = ?pending.id,
            "Recording stopped: {:?}",
            path
        );

        let payload = RecordedPayload::new(path.to_string_lossy().to_string(), pending.id);
        emit_logged(self.dispatcher.as_ref(), &pending.event, &payload);

        Some(path)
    }

    /// The host went to the background.
    ///
    /// Pauses an active recording unless background capture was enabled.
    pub fn host_suspended(&mut self) {
        if self.capture_options.background || self.status() != RecordingStatus::Recording {
            return;
        }
        tracing::info!("Host suspended; pausing recording");
        self.request_pause();
        self.paused_by_host = true;
    }

    /// The host came back; resumes only a pause caused by suspension
    pub fn host_resumed(&mut self) {
        if !self.paused_by_host {
            return;
        }
        self.paused_by_host = false;
        if self.status() == RecordingStatus::Paused {
            tracing::info!("Host resumed; resuming recording");
            self.request_resume();
        }
    }

    /// Free the capture capability; safe to call repeatedly.
    ///
    /// A recording still in progress is discarded and its pending request
    /// consumed without an event.
    pub fn release(&mut self) {
        if let Some(mut capability) = self.capability.take() {
            let was_active = capability.status().is_active();
            capability.release();
            self.paused_by_host = false;

            if was_active {
                tracing::info!("Active recording discarded on release");
                if let Err(e) = self.store.clear() {
                    tracing::warn!("Failed to clear pending request: {}", e);
                }
            }
            tracing::info!("Capture capability released");
        }
    }
}

impl Drop for RecordingCoordinator {
    fn drop(&mut self) {
        self.release();
    }
}
