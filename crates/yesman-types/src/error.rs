//! Error types shared across all yesman crates.

use std::time::Duration;

/// Failures reported by a terminal session provider.
///
/// The controller decides what to do with each variant: `PaneGone` is
/// terminal for the monitored pane, the others are counted toward the
/// consecutive-failure cap and retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("target pane no longer exists")]
    PaneGone,

    #[error("session provider unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("keystroke delivery failed: {0}")]
    SendFailed(String),
}

impl ProviderError {
    /// Whether this failure should end monitoring without retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderError::PaneGone)
    }
}

/// Failures of the learned-pattern store. Never fatal for the engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("pattern store is corrupt: {0}")]
    Corrupt(String),

    #[error("pattern store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pattern store serialization error: {0}")]
    Serialize(String),
}

/// Rejected lifecycle requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("controller is in ERROR; use restart")]
    RequiresRestart,

    #[error("previous poll loop for {0} has not exited yet")]
    StillDraining(String),

    #[error("controller command queue closed")]
    Closed,

    #[error("no controller for pane {0}")]
    NotFound(String),

    #[error("failed to spawn controller thread: {0}")]
    SpawnFailed(String),
}

/// Errors that can occur across the yesman runtime.
#[derive(Debug, thiserror::Error)]
pub enum YesmanError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
