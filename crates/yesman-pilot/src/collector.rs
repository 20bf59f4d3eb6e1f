//! Pane snapshotting and new-content extraction.
//!
//! The collector reads a pane once per call, cleans the text, and compares
//! it with the previous snapshot for that pane. Only content that appeared
//! since the last call is handed on to the detector.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use yesman_types::{PaneKey, ProviderError};

use crate::ansi::clean_capture;
use crate::provider::SessionProvider;

/// Result of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Pane text is identical to the previous snapshot.
    Unchanged,
    /// Pane text differs; `new_text` is the portion that was not seen before.
    Changed { snapshot: String, new_text: String },
    /// The pane no longer exists.
    PaneGone,
}

/// Last observed state of one pane.
#[derive(Debug, Clone)]
pub struct PaneRecord {
    pub key: PaneKey,
    pub last_snapshot: String,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// Length of the snapshot when its prompt was answered. Text that later
    /// extends that snapshot on the same line is echoed input.
    answered_len: Option<usize>,
}

/// Snapshots panes through a [`SessionProvider`] and diffs consecutive reads.
pub struct Collector {
    provider: Arc<dyn SessionProvider>,
    panes: HashMap<PaneKey, PaneRecord>,
}

impl Collector {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            panes: HashMap::new(),
        }
    }

    /// Read the pane once and report what changed.
    pub fn capture(&mut self, key: &PaneKey) -> Result<Capture, ProviderError> {
        let raw = match self.provider.capture_pane(key) {
            Ok(raw) => raw,
            Err(ProviderError::PaneGone) => return Ok(Capture::PaneGone),
            Err(e) => return Err(e),
        };
        let snapshot = clean_capture(&raw);

        let record = self.panes.entry(key.clone()).or_insert_with(|| PaneRecord {
            key: key.clone(),
            last_snapshot: String::new(),
            last_snapshot_at: None,
            answered_len: None,
        });
        let first = record.last_snapshot_at.is_none();
        record.last_snapshot_at = Some(Utc::now());

        if !first && record.last_snapshot == snapshot {
            return Ok(Capture::Unchanged);
        }

        let new_text = if first {
            snapshot.clone()
        } else if let Some(text) = record.after_answer(&snapshot) {
            text
        } else {
            new_content(&record.last_snapshot, &snapshot)
        };
        debug!(pane = %key, new_bytes = new_text.len(), "pane content changed");
        record.last_snapshot = snapshot.clone();

        Ok(Capture::Changed { snapshot, new_text })
    }

    /// Drop everything remembered about a pane.
    pub fn forget(&mut self, key: &PaneKey) {
        self.panes.remove(key);
    }

    pub fn record(&self, key: &PaneKey) -> Option<&PaneRecord> {
        self.panes.get(key)
    }

    /// The prompt in the pane's current snapshot was answered. Until output
    /// moves past the end of that snapshot's last line, growth of that line
    /// is not reported as new content.
    pub fn mark_answered(&mut self, key: &PaneKey) {
        if let Some(record) = self.panes.get_mut(key) {
            record.answered_len = Some(record.last_snapshot.len());
        }
    }
}

impl PaneRecord {
    /// New text for `snapshot` while an answered prompt line is still open,
    /// or `None` when normal diffing applies.
    fn after_answer(&mut self, snapshot: &str) -> Option<String> {
        let at = self.answered_len?;
        let rest = self
            .last_snapshot
            .get(..at)
            .and_then(|answered| snapshot.strip_prefix(answered));
        let Some(rest) = rest else {
            self.answered_len = None;
            return None;
        };
        match rest.find('\n') {
            Some(newline) => {
                self.answered_len = None;
                Some(rest[newline + 1..].to_string())
            }
            None => Some(String::new()),
        }
    }
}

/// Text in `new` that was not already present in `old`.
///
/// When `new` extends `old`, the result starts at the beginning of the line
/// that `old` ended in, so a prompt whose last line was still being drawn is
/// seen whole. Otherwise the output has scrolled: the longest run of lines
/// ending `old` (minus its last, possibly partial, line) that also starts
/// `new` is skipped. With no such run all of `new` is returned.
pub fn new_content(old: &str, new: &str) -> String {
    if old.is_empty() {
        return new.to_string();
    }

    if let Some(rest) = new.strip_prefix(old) {
        if let Some(rest) = rest.strip_prefix('\n') {
            return rest.to_string();
        }
        let line_start = old.rfind('\n').map(|i| i + 1).unwrap_or(0);
        return new[line_start..].to_string();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let old_complete = &old_lines[..old_lines.len().saturating_sub(1)];
    let new_lines: Vec<&str> = new.lines().collect();

    let max = old_complete.len().min(new_lines.len());
    for overlap in (1..=max).rev() {
        if old_complete[old_complete.len() - overlap..] == new_lines[..overlap] {
            return new_lines[overlap..].join("\n");
        }
    }

    new.to_string()
}
