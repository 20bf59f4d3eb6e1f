//! Bounded activity feed for dashboards.
//!
//! Controllers push what they observe and do; readers get the most recent
//! entries first. The oldest entries fall off once capacity is reached.
//! Every entry carries a sequence number that increases across the life of
//! the feed, so a reader can ask for exactly what it has not seen yet.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use yesman_types::{ControllerState, Outcome, PaneKey, PromptType, ResponseSource};

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedKind {
    PromptDetected {
        prompt_type: PromptType,
        signature: String,
        retry: bool,
    },
    Responded {
        value: String,
        confidence: f64,
        source: ResponseSource,
    },
    OutcomeRecorded {
        signature: String,
        outcome: Outcome,
    },
    /// Text typed by the operator through the controller.
    InputSent { text: String },
    /// The operator's answer to a prompt left alone was learned.
    OperatorAnswered { signature: String, value: String },
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    Failure { error: String, consecutive: u32 },
}

/// One feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub pane: PaneKey,
    #[serde(flatten)]
    pub kind: FeedKind,
}

#[derive(Debug)]
struct Entries {
    buf: VecDeque<FeedEntry>,
    next_seq: u64,
}

/// Shared ring buffer of recent activity. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct ActivityFeed {
    entries: Arc<Mutex<Entries>>,
    capacity: usize,
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(Entries {
                buf: VecDeque::with_capacity(capacity),
                next_seq: 1,
            })),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, pane: &PaneKey, kind: FeedKind) {
        let mut entries = self.lock();
        if entries.buf.len() == self.capacity {
            entries.buf.pop_front();
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.buf.push_back(FeedEntry {
            seq,
            at: Utc::now(),
            pane: pane.clone(),
            kind,
        });
    }

    /// Entries pushed after the one numbered `seq`, oldest first. Pass 0
    /// for everything still buffered.
    pub fn since(&self, seq: u64) -> Vec<FeedEntry> {
        self.lock()
            .buf
            .iter()
            .filter(|e| e.seq > seq)
            .cloned()
            .collect()
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<FeedEntry> {
        self.lock().buf.iter().rev().take(n).cloned().collect()
    }

    /// Up to `n` entries for one pane, newest first.
    pub fn recent_for(&self, pane: &PaneKey, n: usize) -> Vec<FeedEntry> {
        self.lock()
            .buf
            .iter()
            .rev()
            .filter(|e| &e.pane == pane)
            .take(n)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
