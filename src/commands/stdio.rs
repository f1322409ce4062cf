//! JSON-lines host protocol
//!
//! One request per line:
//!
//! ```json
//! {"seq": 1, "op": "Start", "params": {"id": "memo-1"}}
//! ```
//!
//! answered by one line carrying either `ok` (the result map) or `error`
//! (an [`ErrorResponse`]). Events are written on the same stream as
//! `{"event": <name>, "payload": {...}}`.

use super::recording::Bridge;
use crate::events::RecordingEvent;
use crate::utils::error::{AppError, ErrorResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
struct LineRequest {
    #[serde(default)]
    seq: Option<Value>,
    op: String,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// Handle one request line and produce the response line
pub async fn handle_line(bridge: &Bridge, line: &str) -> String {
    let request: LineRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Malformed request line: {}", e);
            return error_line(None, AppError::from(e));
        }
    };

    let params = request.params.unwrap_or_default();
    match bridge.call(&request.op, &params).await {
        Ok(result) => json!({ "seq": request.seq, "ok": result }).to_string(),
        Err(e) => {
            tracing::warn!(op = %request.op, "Bridge call failed: {}", e);
            error_line(request.seq, e)
        }
    }
}

fn error_line(seq: Option<Value>, error: AppError) -> String {
    json!({ "seq": seq, "error": ErrorResponse::from(error) }).to_string()
}

/// Render an event for the output stream
pub fn event_line(event: &RecordingEvent) -> String {
    json!({ "event": event.name, "payload": event.payload }).to_string()
}
