//! Host bridges
//!
//! [`recording`] holds the transport-independent bridge; [`stdio`] and
//! [`plugin`] (feature `tauri-bridge`) put it on a wire.

#[cfg(feature = "tauri-bridge")]
pub mod plugin;
pub mod recording;
pub mod stdio;

pub use recording::{Bridge, BridgeRequest, BridgeResponse};
