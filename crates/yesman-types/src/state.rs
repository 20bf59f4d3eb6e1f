//! Runtime state of a session controller.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single pane controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Registered, never started.
    Created,
    /// Poll loop spawned, waiting for the first successful capture.
    Starting,
    Running,
    /// Loop alive but neither capturing nor responding.
    Paused,
    /// Stop requested, waiting for the loop to exit.
    Stopping,
    Stopped,
    /// Monitoring failed; requires an explicit restart.
    Error,
}

impl ControllerState {
    /// States in which a poll loop is (or is about to be) alive.
    pub fn has_live_loop(&self) -> bool {
        matches!(
            self,
            ControllerState::Starting
                | ControllerState::Running
                | ControllerState::Paused
                | ControllerState::Stopping
        )
    }

    /// States that only an explicit lifecycle call can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::Stopped | ControllerState::Error)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerState::Created => "Created",
            ControllerState::Starting => "Starting",
            ControllerState::Running => "Running",
            ControllerState::Paused => "Paused",
            ControllerState::Stopping => "Stopping",
            ControllerState::Stopped => "Stopped",
            ControllerState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Counters collected by one controller's poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub ticks: u64,
    pub prompts_detected: u64,
    pub responses_sent: u64,
    pub learned_responses: u64,
    pub default_responses: u64,
    pub corrections: u64,
    /// Operator answers learned for prompts that were not auto-answered.
    pub operator_answers: u64,
    pub send_failures: u64,
}

/// Point-in-time view of a controller, as reported by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub auto_respond: bool,
    pub stats: ControllerStats,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            state: ControllerState::Created,
            last_activity_at: None,
            consecutive_failures: 0,
            last_error: None,
            auto_respond: true,
            stats: ControllerStats::default(),
        }
    }
}
