//! Test doubles shared by the unit tests

use crate::capture::{
    CapabilityFactory, CaptureError, CaptureOptions, CaptureResult, PermissionGate,
    PermissionStatus, RecordingCapability, RecordingStatus,
};
use crate::events::{DispatchError, EventDispatcher, RecordingEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    status: RecordingStatus,
    last_path: Option<PathBuf>,
    recordings: usize,
    created: usize,
    start_calls: usize,
    pause_calls: usize,
    resume_calls: usize,
    release_calls: usize,
    fail_next_start: bool,
    fail_next_stop: bool,
    fail_create: bool,
    stop_delay: Duration,
    last_options: Option<CaptureOptions>,
}

/// Scripted capture; clones and the capabilities it builds share state
#[derive(Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> FakeFactory {
        FakeFactory {
            state: self.state.clone(),
        }
    }

    pub fn fail_next_start(&self) {
        self.state.lock().fail_next_start = true;
    }

    pub fn fail_next_stop(&self) {
        self.state.lock().fail_next_stop = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Make `stop` block like an encoder finalizing its output
    pub fn set_stop_delay(&self, delay: Duration) {
        self.state.lock().stop_delay = delay;
    }

    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub fn pause_calls(&self) -> usize {
        self.state.lock().pause_calls
    }

    pub fn resume_calls(&self) -> usize {
        self.state.lock().resume_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().release_calls
    }

    pub fn last_options(&self) -> Option<CaptureOptions> {
        self.state.lock().last_options
    }
}

pub struct FakeFactory {
    state: Arc<Mutex<FakeState>>,
}

impl CapabilityFactory for FakeFactory {
    fn create(&self, options: CaptureOptions) -> anyhow::Result<Box<dyn RecordingCapability>> {
        let mut state = self.state.lock();
        state.last_options = Some(options);
        if state.fail_create {
            state.fail_create = false;
            anyhow::bail!("microphone unavailable");
        }
        state.created += 1;
        Ok(Box::new(FakeCapability {
            state: self.state.clone(),
        }))
    }
}

struct FakeCapability {
    state: Arc<Mutex<FakeState>>,
}

impl RecordingCapability for FakeCapability {
    fn start(&mut self) -> CaptureResult<bool> {
        let mut state = self.state.lock();
        state.start_calls += 1;
        if state.status.is_active() {
            return Ok(false);
        }
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(CaptureError::Encoder("device busy".to_string()));
        }
        state.status = RecordingStatus::Recording;
        Ok(true)
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        state.pause_calls += 1;
        if state.status == RecordingStatus::Recording {
            state.status = RecordingStatus::Paused;
        }
    }

    fn resume(&mut self) {
        let mut state = self.state.lock();
        state.resume_calls += 1;
        if state.status == RecordingStatus::Paused {
            state.status = RecordingStatus::Recording;
        }
    }

    fn stop(&mut self) -> Option<PathBuf> {
        let delay = self.state.lock().stop_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if !state.status.is_active() {
            return None;
        }
        state.status = RecordingStatus::Idle;
        if state.fail_next_stop {
            state.fail_next_stop = false;
            return None;
        }
        state.recordings += 1;
        let path = PathBuf::from(format!("/cache/recording-{}.m4a", state.recordings));
        state.last_path = Some(path.clone());
        Some(path)
    }

    fn status(&self) -> RecordingStatus {
        self.state.lock().status
    }

    fn last_recording_path(&self) -> Option<PathBuf> {
        self.state.lock().last_path.clone()
    }

    fn duration_ms(&self) -> f64 {
        1_500.0
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.release_calls += 1;
        state.status = RecordingStatus::Idle;
    }
}

/// Gate whose preflight answer can be switched; `request` answers with
/// a separately configured result
pub struct SwitchGate {
    status: Mutex<PermissionStatus>,
    answer: Mutex<PermissionStatus>,
}

impl SwitchGate {
    pub fn new(status: PermissionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            answer: Mutex::new(PermissionStatus::Granted),
        }
    }

    pub fn with_answer(self, answer: PermissionStatus) -> Self {
        *self.answer.lock() = answer;
        self
    }

    pub fn set(&self, status: PermissionStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl PermissionGate for SwitchGate {
    fn check(&self) -> PermissionStatus {
        *self.status.lock()
    }

    async fn request(&self) -> PermissionStatus {
        let answer = *self.answer.lock();
        if answer.is_granted() {
            self.set(answer);
        }
        answer
    }
}

/// Keeps every event and notice it receives
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<RecordingEvent>>,
    notices: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingDispatcher {
    /// A dispatcher whose transport always fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<RecordingEvent> {
        self.events.lock().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }

    pub fn events_named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.payload.clone())
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }

    /// Wait until at least `count` events arrived
    pub async fn wait_for_events(&self, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.events.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {} events", count);
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn emit(&self, event: &str, payload: &Value) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Transport("connection refused".to_string()));
        }
        self.events.lock().push(RecordingEvent {
            name: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn notify(&self, message: &str) {
        self.notices.lock().push(message.to_string());
    }
}
