//! Stdio host for the microphone recorder.
//!
//! Reads JSON-lines requests on stdin and writes responses and events on
//! stdout. Logs go to stderr.
//!
//! Usage: `mic-bridge [--config <path>]` (or set `MICROPHONE_RECORDING_CONFIG`)

use anyhow::{bail, Context, Result};
use microphone_recording::commands::stdio::{event_line, handle_line};
use microphone_recording::config::{RecorderConfig, CONFIG_ENV};
use microphone_recording::events::{BroadcastDispatcher, EventDispatcher};
use microphone_recording::{build_recorder, init_tracing};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{broadcast, Mutex};

fn config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                return Ok(Some(PathBuf::from(path)));
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

async fn write_line(stdout: &Mutex<Stdout>, line: &str) -> Result<()> {
    let mut stdout = stdout.lock().await;
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match config_path()? {
        Some(path) => RecorderConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RecorderConfig::default(),
    };
    init_tracing(&config.log_filter);

    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let broadcast = Arc::new(BroadcastDispatcher::default());
    let mut events = broadcast.subscribe();

    let forwarder = tokio::spawn({
        let stdout = stdout.clone();
        async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = write_line(&stdout, &event_line(&event)).await {
                            tracing::warn!("Failed to write event: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    let dispatcher: Arc<dyn EventDispatcher> = broadcast.clone();
    let (bridge, service) = build_recorder(&config, dispatcher);
    let service = tokio::spawn(service.run());
    tracing::info!(cache_dir = ?config.cache_dir, "Bridge ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&bridge, &line).await;
        write_line(&stdout, &response).await?;
    }

    tracing::info!("Input closed, shutting down");
    if let Err(e) = bridge.handle().release().await {
        tracing::warn!("Release failed: {}", e);
    }

    // The service holds the last dispatcher reference once the bridge is gone
    drop(bridge);
    service.await?;
    drop(broadcast);
    forwarder.await?;
    Ok(())
}
