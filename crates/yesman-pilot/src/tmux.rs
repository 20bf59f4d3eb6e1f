//! Tmux-backed session provider.
//!
//! Shells out to the `tmux` binary for every operation: `list-panes -a` for
//! the session listing, `capture-pane` for pane text, and `send-keys` for
//! input. Each invocation is bounded by a timeout; a tmux client that hangs
//! is killed rather than waited on.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use yesman_types::{PaneKey, ProviderError, SessionInfo};

use crate::provider::SessionProvider;

/// Format string handed to `list-panes -F`; fields are tab-separated.
const PANE_FORMAT: &str =
    "#{session_name}\t#{window_index}\t#{pane_index}\t#{pane_current_path}";

/// Check whether tmux is available on the system.
pub fn tmux_available() -> bool {
    Command::new("tmux")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Map tmux's stderr to a typed error.
///
/// Messages that do not match a known failure class are handed to `fallback`.
pub fn classify_stderr(
    stderr: &str,
    fallback: impl FnOnce(String) -> ProviderError,
) -> ProviderError {
    let lower = stderr.to_lowercase();
    if lower.contains("can't find") {
        ProviderError::PaneGone
    } else if lower.contains("no server running") || lower.contains("error connecting") {
        ProviderError::Unavailable(stderr.trim().to_string())
    } else if lower.contains("permission denied") {
        ProviderError::PermissionDenied(stderr.trim().to_string())
    } else {
        fallback(stderr.trim().to_string())
    }
}

/// Group `list-panes -a` output into one `SessionInfo` per session.
///
/// The working directory of a session is that of its first listed pane.
pub fn parse_pane_listing(output: &str) -> Vec<SessionInfo> {
    let mut sessions: BTreeMap<String, SessionInfo> = BTreeMap::new();

    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(window), Some(pane)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(window), Ok(pane)) = (window.parse::<u32>(), pane.parse::<u32>()) else {
            debug!(line, "skipping malformed list-panes line");
            continue;
        };
        let path = fields.next().filter(|p| !p.is_empty()).map(PathBuf::from);

        let info = sessions
            .entry(name.to_string())
            .or_insert_with(|| SessionInfo::active(name));
        if info.working_dir.is_none() {
            info.working_dir = path;
        }
        info.panes.push(PaneKey::new(name, window, pane));
    }

    sessions.into_values().collect()
}

/// A [`SessionProvider`] that drives a local tmux server.
#[derive(Debug, Clone)]
pub struct TmuxProvider {
    binary: String,
    timeout: Duration,
    capture_lines: u32,
}

impl TmuxProvider {
    pub fn new(timeout: Duration, capture_lines: u32) -> Self {
        Self {
            binary: "tmux".into(),
            timeout,
            capture_lines,
        }
    }

    /// Use a different executable in place of `tmux`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run one tmux command and return its stdout.
    ///
    /// Failures are classified from stderr; unrecognized ones go through
    /// `fallback`.
    fn run(
        &self,
        args: &[&str],
        fallback: impl FnOnce(String) -> ProviderError,
    ) -> Result<String, ProviderError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ProviderError::Unavailable(format!("failed to spawn {}: {e}", self.binary))
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(command = ?args.first(), "tmux call timed out, killed");
                    return Err(ProviderError::Timeout(self.timeout));
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(e) => {
                    return Err(ProviderError::Unavailable(format!(
                        "waiting on {} failed: {e}",
                        self.binary
                    )))
                }
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if status.success() {
            Ok(String::from_utf8_lossy(&stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&stderr);
            let stderr = if stderr.trim().is_empty() {
                format!("{} exited with {status}", self.binary)
            } else {
                stderr.into_owned()
            };
            Err(classify_stderr(&stderr, fallback))
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl SessionProvider for TmuxProvider {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, ProviderError> {
        match self.run(&["list-panes", "-a", "-F", PANE_FORMAT], ProviderError::Unavailable) {
            Ok(out) => Ok(parse_pane_listing(&out)),
            // A server that isn't running has no sessions.
            Err(ProviderError::Unavailable(msg)) if msg.contains("no server running") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn capture_pane(&self, key: &PaneKey) -> Result<String, ProviderError> {
        let target = key.target();
        let start = format!("-{}", self.capture_lines);
        self.run(
            &["capture-pane", "-p", "-J", "-t", &target, "-S", &start],
            ProviderError::Unavailable,
        )
    }

    fn send_keys(&self, key: &PaneKey, text: &str) -> Result<(), ProviderError> {
        let target = key.target();
        self.run(
            &["send-keys", "-t", &target, "-l", "--", text],
            ProviderError::SendFailed,
        )?;
        self.run(&["send-keys", "-t", &target, "Enter"], ProviderError::SendFailed)?;
        Ok(())
    }
}
