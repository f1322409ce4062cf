//! Microphone recording for host applications.
//!
//! A recording coordinator that asks for microphone permission, starts an
//! AAC capture, supports pause/resume and reports the finished file through
//! named events. Hosts talk to it through [`commands::Bridge`]: in-process,
//! over JSON lines (`mic-bridge`), or as a Tauri plugin (feature
//! `tauri-bridge`).

pub mod capture;
pub mod commands;
pub mod config;
pub mod events;
pub mod recorder;
pub mod utils;

#[cfg(test)]
mod testing;

use capture::{
    FfmpegCapabilityFactory, FfmpegSettings, PermissionGate, PromptPermissionGate,
    StaticPermissionGate,
};
use commands::Bridge;
use config::{PermissionMode, RecorderConfig};
use events::EventDispatcher;
use recorder::{JsonFileStore, RecorderService, RecordingCoordinator};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging to stderr.
///
/// `RUST_LOG` wins over `default_filter`. Does nothing if a subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str) {
    let initialized = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    if initialized.is_ok() {
        tracing::info!("Microphone recording v{}", env!("CARGO_PKG_VERSION"));
    }
}

/// Wire a recorder from config.
///
/// Returns the bridge for the host and the service, which the caller must
/// spawn (`service.run()`) on a tokio runtime.
pub fn build_recorder(
    config: &RecorderConfig,
    dispatcher: Arc<dyn EventDispatcher>,
) -> (Bridge, RecorderService) {
    let prompt = match config.permission {
        PermissionMode::Granted => None,
        PermissionMode::Prompt => Some(Arc::new(PromptPermissionGate::new(dispatcher.clone()))),
    };
    let gate: Arc<dyn PermissionGate> = match &prompt {
        Some(prompt) => prompt.clone() as Arc<dyn PermissionGate>,
        None => Arc::new(StaticPermissionGate::granted()),
    };

    let factory = FfmpegCapabilityFactory::new(FfmpegSettings::from(config));
    let store = JsonFileStore::new(&config.state_dir);

    let coordinator =
        RecordingCoordinator::new(Box::new(factory), gate.clone(), Box::new(store), dispatcher)
            .with_default_event(config.default_event.clone())
            .with_background(config.record_in_background);
    let (service, handle) = RecorderService::new(coordinator, gate);

    let bridge = match prompt {
        Some(prompt) => Bridge::new(handle).with_prompt(prompt),
        None => Bridge::new(handle),
    };
    (bridge, service)
}
