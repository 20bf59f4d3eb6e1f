use std::sync::Arc;

use anyhow::{bail, Context, Result};

use yesman_daemon::SessionCache;
use yesman_pilot::tmux::tmux_available;
use yesman_types::AutomationConfig;

use crate::commands::tmux_provider;

/// Run `yesman sessions`.
pub fn run(config: &AutomationConfig) -> Result<()> {
    if !tmux_available() {
        bail!("tmux is not installed or not on PATH");
    }

    let cache = SessionCache::new(Arc::new(tmux_provider(config)), &config.cache);
    let sessions = cache.list().context("failed to list tmux sessions")?;

    if sessions.is_empty() {
        println!("No tmux sessions.");
        return Ok(());
    }

    println!("{:<24} {:<8} {:<6} DIRECTORY", "SESSION", "STATUS", "PANES");
    println!("{}", "-".repeat(72));
    for session in &sessions {
        let status = if session.is_active() { "active" } else { "inactive" };
        let dir = session
            .working_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<24} {:<8} {:<6} {}",
            session.id,
            status,
            session.panes.len(),
            dir
        );
        for pane in &session.panes {
            println!("  {}", pane.target());
        }
    }
    Ok(())
}
