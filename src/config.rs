//! Recorder configuration
//!
//! Every field has a default so a partial (or missing) config file works.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::RECORDED_EVENT;
use crate::utils::error::{AppError, AppResult};

/// Namespace used for the cache directory and the durable pending-request record
pub const NAMESPACE: &str = "microphone_recording";

/// Environment variable pointing at a config file
pub const CONFIG_ENV: &str = "MICROPHONE_RECORDING_CONFIG";

/// How microphone permission is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// The platform grants access when the device is opened
    Granted,
    /// The host shows a prompt and answers through the bridge
    Prompt,
}

impl Default for PermissionMode {
    fn default() -> Self {
        Self::Granted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Where finished recordings are written
    pub cache_dir: PathBuf,

    /// Where the pending-request record lives
    pub state_dir: PathBuf,

    pub ffmpeg_path: PathBuf,

    /// FFmpeg input demuxer
    pub input_format: String,

    /// FFmpeg input device
    pub input_device: String,

    pub bitrate_kbps: u32,

    pub sample_rate: u32,

    /// Keep recording while the host is suspended
    pub record_in_background: bool,

    pub stop_timeout_ms: u64,

    pub startup_grace_ms: u64,

    /// Event raised on completion when a start request names none
    pub default_event: String,

    pub permission: PermissionMode,

    /// Fallback tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

fn default_input() -> (&'static str, &'static str) {
    #[cfg(target_os = "macos")]
    {
        ("avfoundation", ":0")
    }

    #[cfg(target_os = "windows")]
    {
        ("dshow", "audio=Microphone")
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        ("pulse", "default")
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        let (input_format, input_device) = default_input();
        let cache_root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        let state_root = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);

        Self {
            cache_dir: cache_root.join(NAMESPACE),
            state_dir: state_root.join(NAMESPACE),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            input_format: input_format.to_string(),
            input_device: input_device.to_string(),
            bitrate_kbps: 128,
            sample_rate: 44_100,
            record_in_background: false,
            stop_timeout_ms: 3_000,
            startup_grace_ms: 150,
            default_event: RECORDED_EVENT.to_string(),
            permission: PermissionMode::default(),
            log_filter: "microphone_recording=debug".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Load a config file
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load a config file, falling back to defaults if it is missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> AppResult<()> {
        if self.default_event.trim().is_empty() {
            return Err(AppError::Config("defaultEvent must not be empty".to_string()));
        }
        if self.bitrate_kbps == 0 || self.sample_rate == 0 {
            return Err(AppError::Config(
                "bitrateKbps and sampleRate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
