//! Recording bridge operations
//!
//! The host calls in with an operation name and an untyped parameter map.
//! Parameters are validated once here and turned into a [`BridgeRequest`];
//! everything past this point is typed.

use crate::capture::{PromptPermissionGate, RecordingStatus};
use crate::recorder::{RecorderHandle, StartRequest};
use crate::utils::error::{AppError, AppResult};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// A validated bridge operation
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeRequest {
    Start(StartRequest),
    Stop,
    Pause,
    Resume,
    GetStatus,
    GetRecording,
    GetDuration,
    PermissionResult { granted: bool },
    HostSuspended,
    HostResumed,
    Release,
}

impl BridgeRequest {
    /// Parse an operation name and its parameters
    pub fn parse(op: &str, params: &Map<String, Value>) -> AppResult<Self> {
        let request = match op {
            "Start" => Self::Start(StartRequest {
                id: optional_string(params, "id")?,
                event: optional_string(params, "event")?,
                background: optional_bool(params, "background")?,
            }),
            "Stop" => Self::Stop,
            "Pause" => Self::Pause,
            "Resume" => Self::Resume,
            "GetStatus" => Self::GetStatus,
            "GetRecording" => Self::GetRecording,
            "GetDuration" => Self::GetDuration,
            "PermissionResult" => Self::PermissionResult {
                granted: required_bool(params, "granted")?,
            },
            "HostSuspended" => Self::HostSuspended,
            "HostResumed" => Self::HostResumed,
            "Release" => Self::Release,
            other => return Err(AppError::UnknownOperation(other.to_string())),
        };
        Ok(request)
    }
}

fn invalid(name: &str, reason: &str) -> AppError {
    AppError::InvalidParams {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn optional_string(params: &Map<String, Value>, name: &str) -> AppResult<Option<String>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(invalid(name, "expected a string")),
    }
}

fn optional_bool(params: &Map<String, Value>, name: &str) -> AppResult<Option<bool>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(invalid(name, "expected a boolean")),
    }
}

fn required_bool(params: &Map<String, Value>, name: &str) -> AppResult<bool> {
    optional_bool(params, name)?.ok_or_else(|| invalid(name, "missing"))
}

/// Result of a bridge operation
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeResponse {
    Empty,
    Status(RecordingStatus),
    Recording(Option<PathBuf>),
    Duration(f64),
}

impl BridgeResponse {
    /// Convert to the string-keyed result map handed back to the host
    pub fn into_map(self) -> Map<String, Value> {
        let value = match self {
            Self::Empty => json!({}),
            Self::Status(status) => json!({ "status": status.as_str() }),
            Self::Recording(path) => json!({
                "path": path.map(|p| p.to_string_lossy().to_string()).unwrap_or_default()
            }),
            Self::Duration(ms) => json!({ "durationMs": ms }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Entry point for host bridges
#[derive(Clone)]
pub struct Bridge {
    handle: RecorderHandle,
    prompt: Option<Arc<PromptPermissionGate>>,
}

impl Bridge {
    pub fn new(handle: RecorderHandle) -> Self {
        Self {
            handle,
            prompt: None,
        }
    }

    /// Route `PermissionResult` answers to a host-driven prompt first
    pub fn with_prompt(mut self, prompt: Arc<PromptPermissionGate>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn handle(&self) -> &RecorderHandle {
        &self.handle
    }

    /// Run a typed request.
    ///
    /// `Start` returns as soon as the attempt is accepted; its outcome is
    /// reported through events.
    pub async fn execute(&self, request: BridgeRequest) -> AppResult<BridgeResponse> {
        tracing::debug!(?request, "Bridge request");

        let response = match request {
            BridgeRequest::Start(start) => {
                let outcome = self.handle.start(start).await?;
                tracing::debug!(?outcome, "Start handled");
                BridgeResponse::Empty
            }
            BridgeRequest::Stop => {
                self.handle.stop().await?;
                BridgeResponse::Empty
            }
            BridgeRequest::Pause => {
                self.handle.pause().await?;
                BridgeResponse::Empty
            }
            BridgeRequest::Resume => {
                self.handle.resume().await?;
                BridgeResponse::Empty
            }
            BridgeRequest::GetStatus => BridgeResponse::Status(self.handle.status().await?),
            BridgeRequest::GetRecording => {
                BridgeResponse::Recording(self.handle.last_recording().await?)
            }
            BridgeRequest::GetDuration => BridgeResponse::Duration(self.handle.duration_ms().await?),
            BridgeRequest::PermissionResult { granted } => {
                let answered_prompt = self
                    .prompt
                    .as_ref()
                    .is_some_and(|prompt| prompt.resolve(granted));
                if !answered_prompt {
                    self.handle.permission_result(granted).await?;
                }
                BridgeResponse::Empty
            }
            BridgeRequest::HostSuspended => {
                self.handle.host_suspended().await?;
                BridgeResponse::Empty
            }
            BridgeRequest::HostResumed => {
                self.handle.host_resumed().await?;
                BridgeResponse::Empty
            }
            BridgeRequest::Release => {
                self.handle.release().await?;
                BridgeResponse::Empty
            }
        };
        Ok(response)
    }

    /// Parse and run an untyped call
    pub async fn call(&self, op: &str, params: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let request = BridgeRequest::parse(op, params)?;
        Ok(self.execute(request).await?.into_map())
    }
}
