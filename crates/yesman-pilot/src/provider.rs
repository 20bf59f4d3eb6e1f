//! Session provider trait abstracting over the terminal multiplexer.
//!
//! Everything above this layer (collector, controllers, cache) talks to a
//! `SessionProvider`, so the tmux backend can be replaced by a scripted fake
//! in tests.

use yesman_types::{PaneKey, ProviderError, SessionInfo};

/// Access to multiplexer sessions and panes.
///
/// Implementations must be safe to call from several poll loops at once.
pub trait SessionProvider: Send + Sync {
    /// All sessions the multiplexer currently knows about, with their panes.
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, ProviderError>;

    /// Current visible text of a pane, including recent scrollback.
    fn capture_pane(&self, key: &PaneKey) -> Result<String, ProviderError>;

    /// Type `text` literally into the pane, then press Enter.
    fn send_keys(&self, key: &PaneKey, text: &str) -> Result<(), ProviderError>;
}
