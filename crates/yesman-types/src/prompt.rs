//! Detected prompts, response decisions, and their outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pane::PaneKey;

/// Shape of an interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    /// "Do you trust the files in this folder?" style permission prompt.
    Trust,
    /// Two or more numbered options.
    Numbered,
    /// `(y/n)` confirmation.
    YesNo,
    /// Two-way choice such as `[1/2]` or `(true/false)`.
    Binary,
    Unknown,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::Trust => "trust",
            PromptType::Numbered => "numbered",
            PromptType::YesNo => "yes_no",
            PromptType::Binary => "binary",
            PromptType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt found in newly-appeared pane content.
///
/// Created by the detector and consumed once by the responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEvent {
    pub id: Uuid,
    pub pane: PaneKey,
    /// The lines of new content that make up the prompt.
    pub raw_text: String,
    pub prompt_type: PromptType,
    /// Dedupe and learning key.
    pub normalized_signature: String,
    /// Choice keys offered by the prompt, e.g. `["1", "2"]` or `["y", "n"]`.
    pub options: Vec<String>,
    pub detected_at: DateTime<Utc>,
    /// Re-emitted after the debounce max-wait without a confirmed response.
    pub retry: bool,
}

/// Where a response value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Learned,
    Default,
}

/// The responder's answer to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDecision {
    pub value: String,
    pub confidence: f64,
    pub source: ResponseSource,
}

/// What happened after an automated response was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// No correction was observed before the next distinct prompt.
    Accepted,
    /// The operator overrode the automated answer with this value.
    Corrected(String),
}
