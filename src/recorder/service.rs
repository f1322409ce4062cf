//! Single-owner recorder loop
//!
//! All coordinator transitions run on one blocking-pool thread, since the
//! capture waits on encoder processes. Callers on any thread talk to it
//! through a cloneable [`RecorderHandle`]; permission answers are fed back
//! into the same command queue, so they never interleave with other
//! operations.

use super::coordinator::RecordingCoordinator;
use super::state::{LifecycleState, StartOutcome, StartRequest};
use crate::capture::{PermissionGate, PermissionStatus, RecordingStatus};
use crate::utils::error::{AppError, AppResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug)]
enum Command {
    Start {
        request: StartRequest,
        reply: oneshot::Sender<StartOutcome>,
    },
    Stop {
        reply: oneshot::Sender<Option<PathBuf>>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<RecordingStatus>,
    },
    State {
        reply: oneshot::Sender<LifecycleState>,
    },
    LastRecording {
        reply: oneshot::Sender<Option<PathBuf>>,
    },
    Duration {
        reply: oneshot::Sender<f64>,
    },
    PermissionResult {
        granted: bool,
        reply: Option<oneshot::Sender<StartOutcome>>,
    },
    HostSuspended {
        reply: oneshot::Sender<()>,
    },
    HostResumed {
        reply: oneshot::Sender<()>,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
}

/// Owns the coordinator and processes commands one at a time
pub struct RecorderService {
    coordinator: RecordingCoordinator,
    gate: Arc<dyn PermissionGate>,
    rx: mpsc::Receiver<Command>,
    /// For prompt tasks; weak so the service stops once all handles are gone
    tx: mpsc::WeakSender<Command>,
    prompt_task: Option<JoinHandle<()>>,
}

/// Cloneable entry point to a running [`RecorderService`]
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<Command>,
}

impl RecorderService {
    /// Create the service and its first handle.
    ///
    /// `gate` must be the gate the coordinator checks against.
    pub fn new(
        coordinator: RecordingCoordinator,
        gate: Arc<dyn PermissionGate>,
    ) -> (Self, RecorderHandle) {
        let (tx, rx) = mpsc::channel(32);
        let service = Self {
            coordinator,
            gate,
            rx,
            tx: tx.downgrade(),
            prompt_task: None,
        };
        (service, RecorderHandle { tx })
    }

    /// Process commands until every handle is dropped, then release capture
    pub async fn run(self) {
        let runtime = Handle::current();
        if let Err(e) = tokio::task::spawn_blocking(move || self.run_blocking(runtime)).await {
            tracing::error!("Recorder service failed: {}", e);
        }
    }

    fn run_blocking(mut self, runtime: Handle) {
        tracing::debug!("Recorder service started");

        while let Some(command) = self.rx.blocking_recv() {
            self.handle(command, &runtime);
        }

        if let Some(task) = self.prompt_task.take() {
            task.abort();
        }
        self.coordinator.release();
        tracing::debug!("Recorder service stopped");
    }

    fn handle(&mut self, command: Command, runtime: &Handle) {
        match command {
            Command::Start { request, reply } => {
                let outcome = self.coordinator.request_start(request);
                if outcome == StartOutcome::PermissionRequested {
                    self.request_permission(runtime);
                }
                let _ = reply.send(outcome);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.coordinator.request_stop());
            }
            Command::Pause { reply } => {
                self.coordinator.request_pause();
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.coordinator.request_resume();
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.coordinator.status());
            }
            Command::State { reply } => {
                let _ = reply.send(self.coordinator.state());
            }
            Command::LastRecording { reply } => {
                let _ = reply.send(self.coordinator.last_recording());
            }
            Command::Duration { reply } => {
                let _ = reply.send(self.coordinator.duration_ms());
            }
            Command::PermissionResult { granted, reply } => {
                let outcome = self.coordinator.on_permission_result(granted);
                tracing::debug!(granted, ?outcome, "Permission result handled");
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Command::HostSuspended { reply } => {
                self.coordinator.host_suspended();
                let _ = reply.send(());
            }
            Command::HostResumed { reply } => {
                self.coordinator.host_resumed();
                let _ = reply.send(());
            }
            Command::Release { reply } => {
                self.coordinator.release();
                let _ = reply.send(());
            }
        }
    }

    /// Show the prompt in the background; its answer re-enters the queue
    fn request_permission(&mut self, runtime: &Handle) {
        if self
            .prompt_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            tracing::debug!("Permission prompt already open");
            return;
        }

        let gate = self.gate.clone();
        let tx = self.tx.clone();
        self.prompt_task = Some(runtime.spawn(async move {
            let granted = match gate.request().await {
                PermissionStatus::Granted => true,
                PermissionStatus::Denied => false,
                PermissionStatus::Undetermined => {
                    tracing::debug!("Permission prompt closed without an answer");
                    return;
                }
            };

            let Some(tx) = tx.upgrade() else {
                return;
            };
            if tx
                .send(Command::PermissionResult {
                    granted,
                    reply: None,
                })
                .await
                .is_err()
            {
                tracing::debug!("Recorder stopped before the permission answer arrived");
            }
        }));
    }
}

impl RecorderHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;
        rx.await.map_err(|_| AppError::ServiceUnavailable)
    }

    pub async fn start(&self, request: StartRequest) -> AppResult<StartOutcome> {
        self.call(|reply| Command::Start { request, reply }).await
    }

    pub async fn stop(&self) -> AppResult<Option<PathBuf>> {
        self.call(|reply| Command::Stop { reply }).await
    }

    pub async fn pause(&self) -> AppResult<()> {
        self.call(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> AppResult<()> {
        self.call(|reply| Command::Resume { reply }).await
    }

    pub async fn status(&self) -> AppResult<RecordingStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    pub async fn state(&self) -> AppResult<LifecycleState> {
        self.call(|reply| Command::State { reply }).await
    }

    pub async fn last_recording(&self) -> AppResult<Option<PathBuf>> {
        self.call(|reply| Command::LastRecording { reply }).await
    }

    pub async fn duration_ms(&self) -> AppResult<f64> {
        self.call(|reply| Command::Duration { reply }).await
    }

    /// Deliver a permission answer obtained outside the configured gate
    pub async fn permission_result(&self, granted: bool) -> AppResult<StartOutcome> {
        self.call(|reply| Command::PermissionResult {
            granted,
            reply: Some(reply),
        })
        .await
    }

    pub async fn host_suspended(&self) -> AppResult<()> {
        self.call(|reply| Command::HostSuspended { reply }).await
    }

    pub async fn host_resumed(&self) -> AppResult<()> {
        self.call(|reply| Command::HostResumed { reply }).await
    }

    /// Release the capture capability (host teardown)
    pub async fn release(&self) -> AppResult<()> {
        self.call(|reply| Command::Release { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PromptPermissionGate, StaticPermissionGate};
    use crate::events::{CANCELLED_EVENT, PERMISSION_REQUESTED_EVENT, RECORDED_EVENT};
    use crate::recorder::pending::MemoryStore;
    use crate::testing::{FakeCapture, RecordingDispatcher, SwitchGate};
    use serde_json::json;
    use std::time::Duration;

    fn spawn(
        gate: Arc<dyn PermissionGate>,
        dispatcher: Arc<RecordingDispatcher>,
        capture: &FakeCapture,
    ) -> (RecorderHandle, JoinHandle<()>) {
        let coordinator = RecordingCoordinator::new(
            Box::new(capture.factory()),
            gate.clone(),
            Box::new(MemoryStore::new()),
            dispatcher,
        );
        let (service, handle) = RecorderService::new(coordinator, gate);
        (handle, tokio::spawn(service.run()))
    }

    async fn wait_for_status(handle: &RecorderHandle, expected: RecordingStatus) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while handle.status().await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "status never became {:?}", expected);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let capture = FakeCapture::new();
        let (handle, _task) = spawn(
            Arc::new(StaticPermissionGate::granted()),
            dispatcher.clone(),
            &capture,
        );

        assert_eq!(handle.status().await.unwrap(), RecordingStatus::Idle);
        assert_eq!(
            handle.start(StartRequest::with_id("memo")).await.unwrap(),
            StartOutcome::Started
        );
        handle.pause().await.unwrap();
        assert_eq!(handle.status().await.unwrap(), RecordingStatus::Paused);
        handle.resume().await.unwrap();
        assert_eq!(handle.duration_ms().await.unwrap(), 1_500.0);

        let path = handle.stop().await.unwrap().unwrap();
        assert_eq!(handle.last_recording().await.unwrap(), Some(path.clone()));
        assert_eq!(
            dispatcher.events_named(RECORDED_EVENT),
            vec![json!({"path": path.to_string_lossy(), "mimeType": "audio/m4a", "id": "memo"})]
        );
    }

    #[tokio::test]
    async fn test_prompt_flow_through_gate() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let gate = Arc::new(PromptPermissionGate::new(dispatcher.clone()));
        let capture = FakeCapture::new();
        let (handle, _task) = spawn(gate.clone(), dispatcher.clone(), &capture);

        assert_eq!(
            handle.start(StartRequest::with_id("X")).await.unwrap(),
            StartOutcome::PermissionRequested
        );
        assert_eq!(handle.state().await.unwrap(), LifecycleState::PermissionPending);

        // A second start while the prompt is open neither starts nor re-prompts
        assert_eq!(
            handle.start(StartRequest::with_id("Y")).await.unwrap(),
            StartOutcome::Suppressed
        );

        dispatcher.wait_for_events(1).await;
        assert_eq!(dispatcher.event_names(), vec![PERMISSION_REQUESTED_EVENT]);

        assert!(gate.resolve(true));
        wait_for_status(&handle, RecordingStatus::Recording).await;

        handle.stop().await.unwrap();
        let recorded = dispatcher.events_named(RECORDED_EVENT);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0]["id"], "X");
        assert_eq!(capture.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_prompt_denied_cancels() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let gate = Arc::new(
            SwitchGate::new(PermissionStatus::Undetermined).with_answer(PermissionStatus::Denied),
        );
        let capture = FakeCapture::new();
        let (handle, _task) = spawn(gate, dispatcher.clone(), &capture);

        handle.start(StartRequest::with_id("X")).await.unwrap();
        dispatcher.wait_for_events(1).await;

        assert_eq!(
            dispatcher.events_named(CANCELLED_EVENT),
            vec![json!({"cancelled": true, "reason": "permission_denied", "id": "X"})]
        );
        assert_eq!(handle.state().await.unwrap(), LifecycleState::Idle);
        assert_eq!(capture.created(), 0);
    }

    #[tokio::test]
    async fn test_external_permission_result() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let gate = Arc::new(PromptPermissionGate::new(dispatcher.clone()));
        let capture = FakeCapture::new();
        let (handle, _task) = spawn(gate, dispatcher, &capture);

        handle.start(StartRequest::default()).await.unwrap();
        assert_eq!(
            handle.permission_result(true).await.unwrap(),
            StartOutcome::Started
        );
        assert_eq!(handle.status().await.unwrap(), RecordingStatus::Recording);
    }

    #[tokio::test]
    async fn test_host_lifecycle_and_release() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let capture = FakeCapture::new();
        let (handle, _task) = spawn(
            Arc::new(StaticPermissionGate::granted()),
            dispatcher,
            &capture,
        );

        handle.start(StartRequest::default()).await.unwrap();
        handle.host_suspended().await.unwrap();
        assert_eq!(handle.status().await.unwrap(), RecordingStatus::Paused);
        handle.host_resumed().await.unwrap();
        assert_eq!(handle.status().await.unwrap(), RecordingStatus::Recording);

        handle.release().await.unwrap();
        handle.release().await.unwrap();
        assert_eq!(handle.status().await.unwrap(), RecordingStatus::Idle);
        assert_eq!(capture.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_service_stops_when_handles_dropped() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let capture = FakeCapture::new();
        let (handle, task) = spawn(
            Arc::new(StaticPermissionGate::granted()),
            dispatcher,
            &capture,
        );

        handle.start(StartRequest::default()).await.unwrap();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        // Capture is released on shutdown
        assert_eq!(capture.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_capture_does_not_stall_runtime() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let capture = FakeCapture::new();
        capture.set_stop_delay(Duration::from_millis(800));
        let (handle, _task) = spawn(
            Arc::new(StaticPermissionGate::granted()),
            dispatcher.clone(),
            &capture,
        );
        handle.start(StartRequest::default()).await.unwrap();

        let stopping = tokio::spawn({
            let handle = handle.clone();
            async move { handle.stop().await }
        });

        // Timers keep firing on this single-threaded runtime while stop blocks
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(stopping.await.unwrap().unwrap().is_some());
        assert_eq!(dispatcher.events_named(RECORDED_EVENT).len(), 1);
    }

    #[tokio::test]
    async fn test_handle_after_service_gone() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let capture = FakeCapture::new();
        let gate: Arc<dyn PermissionGate> = Arc::new(StaticPermissionGate::granted());
        let coordinator = RecordingCoordinator::new(
            Box::new(capture.factory()),
            gate.clone(),
            Box::new(MemoryStore::new()),
            dispatcher,
        );
        let (service, handle) = RecorderService::new(coordinator, gate);
        drop(service);

        assert!(matches!(
            handle.status().await,
            Err(AppError::ServiceUnavailable)
        ));
    }
}
