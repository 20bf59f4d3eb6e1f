//! Addressing and metadata for multiplexer sessions and panes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite key of a monitored pane: session, window index, pane index.
///
/// Renders as the tmux target syntax `session:window.pane`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaneKey {
    pub session: String,
    pub window: u32,
    pub pane: u32,
}

impl PaneKey {
    pub fn new(session: impl Into<String>, window: u32, pane: u32) -> Self {
        Self {
            session: session.into(),
            window,
            pane,
        }
    }

    /// The tmux target string for this pane.
    pub fn target(&self) -> String {
        self.to_string()
    }

    /// Parse a `session:window.pane` target. Window and pane default to 0.
    pub fn parse(target: &str) -> Option<Self> {
        let (session, rest) = match target.rsplit_once(':') {
            Some((s, r)) => (s, Some(r)),
            None => (target, None),
        };
        if session.is_empty() {
            return None;
        }
        let (window, pane) = match rest {
            None => (0, 0),
            Some(r) => match r.split_once('.') {
                Some((w, p)) => (w.parse().ok()?, p.parse().ok()?),
                None => (r.parse().ok()?, 0),
            },
        };
        Some(Self::new(session, window, pane))
    }
}

impl fmt::Display for PaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.session, self.window, self.pane)
    }
}

/// Liveness of a multiplexer session as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
    #[default]
    Unknown,
}

/// Metadata about one multiplexer session, as served by the session cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session name, unique within the multiplexer server.
    pub id: String,
    /// Working directory of the session's first pane, if known.
    pub working_dir: Option<PathBuf>,
    /// Every pane the session currently has.
    pub panes: Vec<PaneKey>,
    pub status: SessionStatus,
    /// When the provider was last asked about this session.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// When the cached copy stops being served.
    pub cache_expires_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    /// An active session with no pane details yet.
    pub fn active(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            working_dir: None,
            panes: Vec::new(),
            status: SessionStatus::Active,
            last_fetched_at: None,
            cache_expires_at: None,
        }
    }

    /// Placeholder for a session the provider did not report.
    pub fn inactive(id: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Inactive,
            ..Self::active(id)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whether the session reports the given pane.
    pub fn has_pane(&self, key: &PaneKey) -> bool {
        self.panes.iter().any(|p| p == key)
    }
}
