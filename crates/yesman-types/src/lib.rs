//! Core types shared across all yesman crates.
//!
//! Defines pane addressing, prompt events, controller state, configuration,
//! and error types used by the pilot (detection and response) and the daemon
//! (controllers and cache).

pub mod config;
pub mod error;
pub mod pane;
pub mod prompt;
pub mod state;

pub use config::{
    default_config_path, default_store_path, yesman_dir, AutomationConfig, CacheConfig,
    ControllerConfig, DefaultResponses, FeedConfig, PollConfig, ResponderConfig, StoreConfig,
    CONFIG_FILENAME, PATTERNS_FILENAME,
};
pub use error::{ControllerError, ProviderError, StoreError, YesmanError};
pub use pane::{PaneKey, SessionInfo, SessionStatus};
pub use prompt::{Outcome, PromptEvent, PromptType, ResponseDecision, ResponseSource};
pub use state::{ControllerState, ControllerStats, ControllerStatus};
