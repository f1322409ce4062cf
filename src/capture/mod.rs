//! Microphone capture
//!
//! The capture capability contract, the FFmpeg-backed implementation and
//! the permission gates consulted before a capture is started.

pub mod ffmpeg;
pub mod permissions;
pub mod traits;

pub use ffmpeg::{FfmpegCapabilityFactory, FfmpegRecorder, FfmpegSettings};
pub use permissions::{
    PermissionGate, PermissionStatus, PromptPermissionGate, StaticPermissionGate,
};
pub use traits::{
    CapabilityFactory, CaptureError, CaptureOptions, CaptureResult, RecordingCapability,
    RecordingStatus,
};
