//! Error types for the dashboard binary.

use cityflow_sync::SyncError;
use cityflow_timeline::TimelineError;

/// Errors that end a dashboard command.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Talking to the simulation API failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Playback or merge setup was rejected.
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    /// Writing output or installing the interrupt handler failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A merged row could not be serialized.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
