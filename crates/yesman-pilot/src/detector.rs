//! Prompt classification and per-pane debouncing.
//!
//! New pane content is matched against an ordered list of prompt rules
//! (trust, numbered, yes/no, binary, then the catch-all shapes typed
//! `Unknown`); the first rule that matches wins. Choice markers such as
//! `(y/n)` only count at the end of a line, so a prompt line that already
//! carries an echoed answer is not seen as a new prompt. A prompt that was
//! already emitted and not yet answered is suppressed until the controller
//! marks it responded or the max-wait elapses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use yesman_types::{PaneKey, PromptEvent, PromptType};

use crate::ansi::strip_ansi;

/// Detection rules, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Trust,
    Numbered,
    YesNo,
    Binary,
    /// Confirmations, text entry, login and terminal setup prompts on the
    /// last line. Typed `Unknown`: only learned answers apply.
    Other,
}

const RULES: [Rule; 5] = [
    Rule::Trust,
    Rule::Numbered,
    Rule::YesNo,
    Rule::Binary,
    Rule::Other,
];

/// Words that make a trailing question a confirmation.
const CONFIRM_WORDS: [&str; 9] = [
    "continue", "proceed", "confirm", "sure", "okay", "accept", "apply", "save", "commit",
];

/// Characters that, ending the last line, indicate the program wants input.
const INPUT_INDICATORS: [&str; 6] = ["❯", ">", ":", "?", "[", "("];

/// A classified prompt, before debouncing and event construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub prompt_type: PromptType,
    pub raw_text: String,
    pub options: Vec<String>,
}

/// Normalizes prompt text into a stable dedupe and learning key.
pub struct SignatureNormalizer {
    re_iso: Regex,
    re_clock: Regex,
    re_path: Regex,
    re_space: Regex,
}

impl SignatureNormalizer {
    pub fn new() -> Self {
        Self {
            re_iso: Regex::new(
                r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?",
            )
            .unwrap(),
            re_clock: Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?\b").unwrap(),
            re_path: Regex::new(r"(?m)(^|\s)(?:~/|\.\./|\./|/)\S*").unwrap(),
            re_space: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Strip escapes, mask timestamps and paths, collapse whitespace, lowercase.
    pub fn normalize(&self, text: &str) -> String {
        let text = strip_ansi(text);
        let text = self.re_iso.replace_all(&text, "<time>");
        let text = self.re_clock.replace_all(&text, "<time>");
        let text = self.re_path.replace_all(&text, "${1}<path>");
        let text = self.re_space.replace_all(&text, " ");
        text.trim().to_lowercase()
    }
}

impl Default for SignatureNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// The last emitted, still unanswered prompt for a pane.
#[derive(Debug, Clone)]
struct Pending {
    signature: String,
    emitted_at: Instant,
}

/// Classifies new pane content into [`PromptEvent`]s.
pub struct Detector {
    re_trust: Regex,
    re_trust_option: Regex,
    re_option_dot: Regex,
    re_option_bracket: Regex,
    re_option_paren: Regex,
    re_yes_no: Regex,
    re_binary_numeric: Regex,
    re_binary_bool: Regex,
    re_confirm: Regex,
    re_text_input: Regex,
    re_login: Regex,
    re_terminal: Regex,
    normalizer: SignatureNormalizer,
    max_wait: Duration,
    pending: HashMap<PaneKey, Pending>,
}

impl Detector {
    /// `max_wait` is how long an unanswered prompt stays suppressed before
    /// it is emitted again as a retry.
    pub fn new(max_wait: Duration) -> Self {
        Self {
            re_trust: Regex::new(
                r"(?i)do you trust the files in this folder|trust this (?:folder|project)",
            )
            .unwrap(),
            re_trust_option: Regex::new(r"(?i)(?:\[1\]|1\.)\s*yes,\s*proceed").unwrap(),
            re_option_dot: Regex::new(r"^\s*(?:❯|>)?\s*(\d+)\.\s+\S").unwrap(),
            re_option_bracket: Regex::new(r"^\s*(?:❯|>)?\s*\[(\d+)\]\s+\S").unwrap(),
            re_option_paren: Regex::new(r"^\s*(?:❯|>)?\s*(\d+)\)\s+\S").unwrap(),
            re_yes_no: Regex::new(r"(?i)(?:\(y/n\)|\(yes/no\)|\[y/n\])[\s:?]*$").unwrap(),
            re_binary_numeric: Regex::new(r"(?:\[1/2\]|\(1/2\))[\s:?]*$").unwrap(),
            re_binary_bool: Regex::new(r"(?i)(?:\(true/false\)|\[true/false\])[\s:?]*$")
                .unwrap(),
            re_confirm: Regex::new(r"(?i)^(?:do you want to|would you like to|should|shall)\b.*\?$")
                .unwrap(),
            re_text_input: Regex::new(r"(?i)^(?:please\s+)?(?:enter|type|input)\s+.+:$").unwrap(),
            re_login: Regex::new(r"(?i)login\s+required|authenticate|sign\s+in|redirect.*login")
                .unwrap(),
            re_terminal: Regex::new(
                r"(?i)terminal\s+settings?|configure\s+terminal|terminal\s+preferences",
            )
            .unwrap(),
            normalizer: SignatureNormalizer::new(),
            max_wait,
            pending: HashMap::new(),
        }
    }

    /// Classify `new_text` from `pane`, applying the debounce.
    pub fn classify(&mut self, pane: &PaneKey, new_text: &str) -> Option<PromptEvent> {
        let detection = self.detect(new_text)?;
        let signature = self.normalizer.normalize(&detection.raw_text);

        let mut retry = false;
        if let Some(pending) = self.pending.get(pane) {
            if pending.signature == signature {
                if pending.emitted_at.elapsed() < self.max_wait {
                    debug!(pane = %pane, signature = %signature, "suppressing unanswered prompt");
                    return None;
                }
                retry = true;
            }
        }

        debug!(
            pane = %pane,
            prompt_type = %detection.prompt_type,
            signature = %signature,
            retry,
            "prompt detected"
        );
        Some(self.emit(pane, detection, signature, retry))
    }

    /// Classify `text` again because the pane has sat unchanged since a
    /// response was attempted. A prompt found here is always a retry and
    /// restarts the pane's max-wait.
    pub fn retry(&mut self, pane: &PaneKey, text: &str) -> Option<PromptEvent> {
        let detection = self.detect(text)?;
        let signature = self.normalizer.normalize(&detection.raw_text);
        debug!(pane = %pane, signature = %signature, "re-emitting prompt on an unchanged pane");
        Some(self.emit(pane, detection, signature, true))
    }

    /// Record `signature` as the pane's pending prompt and build its event.
    fn emit(
        &mut self,
        pane: &PaneKey,
        detection: Detection,
        signature: String,
        retry: bool,
    ) -> PromptEvent {
        self.pending.insert(
            pane.clone(),
            Pending {
                signature: signature.clone(),
                emitted_at: Instant::now(),
            },
        );
        PromptEvent {
            id: Uuid::new_v4(),
            pane: pane.clone(),
            raw_text: detection.raw_text,
            prompt_type: detection.prompt_type,
            normalized_signature: signature,
            options: detection.options,
            detected_at: Utc::now(),
            retry,
        }
    }

    /// The response to the pane's pending prompt was sent.
    pub fn mark_responded(&mut self, pane: &PaneKey) {
        self.pending.remove(pane);
    }

    /// Drop debounce state for a pane.
    pub fn forget(&mut self, pane: &PaneKey) {
        self.pending.remove(pane);
    }

    pub fn normalizer(&self) -> &SignatureNormalizer {
        &self.normalizer
    }

    /// Whether the pane looks like it is waiting for input.
    pub fn is_waiting_for_input(&self, text: &str) -> bool {
        let text = strip_ansi(text);
        let Some(last) = text.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
            return false;
        };
        if INPUT_INDICATORS.iter().any(|i| last.ends_with(i)) {
            return true;
        }
        self.detect(&text).is_some()
    }

    /// Stateless classification of `text`.
    pub fn detect(&self, text: &str) -> Option<Detection> {
        let text = strip_ansi(text);
        if text.trim().is_empty() {
            return None;
        }
        let lines: Vec<&str> = text.lines().collect();
        RULES.iter().find_map(|rule| self.apply(*rule, &lines))
    }

    fn apply(&self, rule: Rule, lines: &[&str]) -> Option<Detection> {
        match rule {
            Rule::Trust => self.detect_trust(lines),
            Rule::Numbered => self.detect_numbered(lines),
            Rule::YesNo => {
                let idx = lines.iter().rposition(|l| self.re_yes_no.is_match(l))?;
                Some(Detection {
                    prompt_type: PromptType::YesNo,
                    raw_text: question_around(lines, idx),
                    options: vec!["y".into(), "n".into()],
                })
            }
            Rule::Binary => {
                if let Some(idx) = lines.iter().rposition(|l| self.re_binary_numeric.is_match(l)) {
                    return Some(Detection {
                        prompt_type: PromptType::Binary,
                        raw_text: question_around(lines, idx),
                        options: vec!["1".into(), "2".into()],
                    });
                }
                let idx = lines.iter().rposition(|l| self.re_binary_bool.is_match(l))?;
                Some(Detection {
                    prompt_type: PromptType::Binary,
                    raw_text: question_around(lines, idx),
                    options: vec!["true".into(), "false".into()],
                })
            }
            Rule::Other => self.detect_other(lines),
        }
    }

    /// Prompt shapes without a fixed answer. Only the last non-empty line is
    /// considered, since the program is waiting there.
    fn detect_other(&self, lines: &[&str]) -> Option<Detection> {
        let idx = lines.iter().rposition(|l| !l.trim().is_empty())?;
        let line = lines[idx].trim();

        let confirmation = line.ends_with('?')
            && (self.re_confirm.is_match(line) || {
                let lower = line.to_lowercase();
                CONFIRM_WORDS.iter().any(|w| lower.contains(w))
            });
        let options = if confirmation {
            vec!["y".into(), "n".into()]
        } else if self.re_text_input.is_match(line)
            || self.re_login.is_match(line)
            || self.re_terminal.is_match(line)
        {
            Vec::new()
        } else {
            return None;
        };

        Some(Detection {
            prompt_type: PromptType::Unknown,
            raw_text: line.to_string(),
            options,
        })
    }

    fn detect_trust(&self, lines: &[&str]) -> Option<Detection> {
        let phrase = lines.iter().position(|l| self.re_trust.is_match(l));
        let option = lines.iter().position(|l| self.re_trust_option.is_match(l));
        let anchor = match (phrase, option) {
            (Some(p), _) => p,
            (None, Some(o)) => question_start(lines, o),
            (None, None) => return None,
        };

        let block = self.option_block(lines);
        let (end, options) = match block {
            Some((_, last, keys)) if last >= anchor => (last, keys),
            _ => (anchor, Vec::new()),
        };

        Some(Detection {
            prompt_type: PromptType::Trust,
            raw_text: join_trimmed(&lines[anchor..=end]),
            options,
        })
    }

    fn detect_numbered(&self, lines: &[&str]) -> Option<Detection> {
        let (first, last, options) = self.option_block(lines)?;
        if options.len() < 2 {
            return None;
        }
        let start = question_start(lines, first);
        Some(Detection {
            prompt_type: PromptType::Numbered,
            raw_text: join_trimmed(&lines[start..=last]),
            options,
        })
    }

    fn option_key(&self, line: &str) -> Option<String> {
        [&self.re_option_dot, &self.re_option_bracket, &self.re_option_paren]
            .iter()
            .find_map(|re| re.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// The last run of option lines: `(first_idx, last_idx, distinct keys)`.
    ///
    /// Blank lines do not break a run; any other line does.
    fn option_block(&self, lines: &[&str]) -> Option<(usize, usize, Vec<String>)> {
        let last = lines.iter().rposition(|l| self.option_key(l).is_some())?;
        let mut first = last;
        let mut keys = Vec::new();

        for idx in (0..=last).rev() {
            let line = lines[idx];
            if line.trim().is_empty() {
                continue;
            }
            match self.option_key(line) {
                Some(key) => {
                    first = idx;
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                None => break,
            }
        }

        keys.reverse();
        Some((first, last, keys))
    }
}

/// Index of the question line for an option block starting at `first_option`.
///
/// The nearest preceding line containing `?`, else the line right before
/// the options, else the first option itself.
fn question_start(lines: &[&str], first_option: usize) -> usize {
    lines[..first_option]
        .iter()
        .rposition(|l| l.contains('?'))
        .or_else(|| {
            lines[..first_option]
                .iter()
                .rposition(|l| !l.trim().is_empty())
        })
        .unwrap_or(first_option)
}

/// The prompt line at `idx`, with the preceding line when `idx` holds only
/// the choice marker.
fn question_around(lines: &[&str], idx: usize) -> String {
    let line = lines[idx].trim();
    let bare_marker = line.starts_with('(') || line.starts_with('[');
    if bare_marker && !line.contains('?') {
        if let Some(prev) = lines[..idx].iter().rposition(|l| !l.trim().is_empty()) {
            return join_trimmed(&lines[prev..=idx]);
        }
    }
    line.to_string()
}

fn join_trimmed(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
