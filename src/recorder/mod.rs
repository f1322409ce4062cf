//! Recording lifecycle
//!
//! - [`RecordingCoordinator`]: the permission/start/pause/stop state machine
//! - [`PendingStore`]: durable slot for the request being recorded
//! - [`RecorderService`]: runs a coordinator on its own task

pub mod coordinator;
pub mod pending;
pub mod service;
pub mod state;

pub use coordinator::RecordingCoordinator;
pub use pending::{JsonFileStore, MemoryStore, PendingStore, StoreError};
pub use service::{RecorderHandle, RecorderService};
pub use state::{LifecycleState, PendingRequest, RecordingSession, StartOutcome, StartRequest};
