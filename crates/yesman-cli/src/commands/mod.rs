//! CLI command implementations for the `yesman` binary.

pub mod patterns;
pub mod sessions;
pub mod watch;

use std::path::Path;

use anyhow::{Context, Result};

use yesman_pilot::tmux::TmuxProvider;
use yesman_types::{default_config_path, AutomationConfig};

/// Display format for timestamps in listings.
pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Load the config at `path`, or the default location. A missing file
/// means defaults.
pub fn load_config(path: Option<&Path>) -> Result<AutomationConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    AutomationConfig::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

/// A tmux provider configured from `config`.
pub fn tmux_provider(config: &AutomationConfig) -> TmuxProvider {
    TmuxProvider::new(config.provider_timeout(), config.poll.capture_lines)
}
