//! Tauri plugin exposing the recording bridge
//!
//! Register with `.plugin(microphone_recording::commands::plugin::init(config))`.
//! Commands are invoked as `plugin:microphone-recording|<command>`; events
//! are emitted to every webview of the app.

use super::recording::{Bridge, BridgeRequest, BridgeResponse};
use crate::config::RecorderConfig;
use crate::events::tauri_emitter::TauriDispatcher;
use crate::recorder::StartRequest;
use crate::utils::error::ErrorResponse;
use serde_json::{Map, Value};
use std::sync::Arc;
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{Manager, RunEvent, Runtime, State};

/// Run any bridge operation by name
#[tauri::command]
pub async fn invoke(
    bridge: State<'_, Bridge>,
    op: String,
    params: Option<Map<String, Value>>,
) -> Result<Map<String, Value>, ErrorResponse> {
    let params = params.unwrap_or_default();
    Ok(bridge.call(&op, &params).await?)
}

#[tauri::command]
pub async fn start(
    bridge: State<'_, Bridge>,
    id: Option<String>,
    event: Option<String>,
    background: Option<bool>,
) -> Result<(), ErrorResponse> {
    let request = StartRequest {
        id,
        event,
        background,
    };
    bridge.execute(BridgeRequest::Start(request)).await?;
    Ok(())
}

#[tauri::command]
pub async fn stop(bridge: State<'_, Bridge>) -> Result<(), ErrorResponse> {
    bridge.execute(BridgeRequest::Stop).await?;
    Ok(())
}

#[tauri::command]
pub async fn pause(bridge: State<'_, Bridge>) -> Result<(), ErrorResponse> {
    bridge.execute(BridgeRequest::Pause).await?;
    Ok(())
}

#[tauri::command]
pub async fn resume(bridge: State<'_, Bridge>) -> Result<(), ErrorResponse> {
    bridge.execute(BridgeRequest::Resume).await?;
    Ok(())
}

#[tauri::command]
pub async fn get_status(bridge: State<'_, Bridge>) -> Result<Map<String, Value>, ErrorResponse> {
    Ok(bridge.execute(BridgeRequest::GetStatus).await?.into_map())
}

/// Path of the last finished recording, empty if none
#[tauri::command]
pub async fn get_recording(bridge: State<'_, Bridge>) -> Result<String, ErrorResponse> {
    match bridge.execute(BridgeRequest::GetRecording).await? {
        BridgeResponse::Recording(Some(path)) => Ok(path.to_string_lossy().to_string()),
        _ => Ok(String::new()),
    }
}

/// Build the plugin; the recorder starts during plugin setup
pub fn init<R: Runtime>(config: RecorderConfig) -> TauriPlugin<R> {
    Builder::new("microphone-recording")
        .invoke_handler(tauri::generate_handler![
            invoke,
            start,
            stop,
            pause,
            resume,
            get_status,
            get_recording,
        ])
        .setup(move |app, _api| {
            let dispatcher = Arc::new(TauriDispatcher::new(app.clone()));
            let (bridge, service) = crate::build_recorder(&config, dispatcher);
            tauri::async_runtime::spawn(service.run());
            app.manage(bridge);
            tracing::info!("Microphone recording plugin initialized");
            Ok(())
        })
        .on_event(|app, event| {
            if let RunEvent::Exit = event {
                let Some(bridge) = app.try_state::<Bridge>() else {
                    return;
                };
                let bridge = bridge.inner().clone();
                if let Err(e) =
                    tauri::async_runtime::block_on(async move { bridge.handle().release().await })
                {
                    tracing::warn!("Failed to release capture on exit: {}", e);
                }
            }
        })
        .build()
}
