//! Confidence-scored response selection with outcome learning.
//!
//! The responder answers a [`PromptEvent`] from the learned-pattern store
//! when it has a confident match, and from the per-type default table
//! otherwise. Outcomes of sent responses feed back into the store: an
//! accepted answer is reinforced, a corrected one is replaced. Answers the
//! operator gives to prompts that were left alone are learned the same way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use yesman_types::{
    DefaultResponses, Outcome, PromptEvent, PromptType, ResponderConfig, ResponseDecision,
    ResponseSource, YesmanError,
};

use crate::store::{LearnedPattern, PatternStore};

/// Runtime-adjustable responder settings.
#[derive(Debug, Clone)]
struct Settings {
    threshold: f64,
    baseline: f64,
    rate: f64,
    auto_respond: bool,
    learning: bool,
    defaults: DefaultResponses,
}

/// Counters reported by [`Responder::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderStats {
    pub learned_decisions: u64,
    pub default_decisions: u64,
    pub acceptances: u64,
    pub corrections: u64,
    pub operator_answers: u64,
    pub patterns_stored: usize,
}

#[derive(Default)]
struct Counters {
    learned: AtomicU64,
    default: AtomicU64,
    accepted: AtomicU64,
    corrected: AtomicU64,
    answered: AtomicU64,
}

/// Chooses responses and learns from their outcomes. Shared by all controllers.
pub struct Responder {
    store: Arc<PatternStore>,
    settings: RwLock<Settings>,
    counters: Counters,
}

impl Responder {
    pub fn new(config: &ResponderConfig, store: Arc<PatternStore>) -> Self {
        Self {
            store,
            settings: RwLock::new(Settings {
                threshold: config.confidence_threshold,
                baseline: config.baseline_confidence,
                rate: config.reinforcement_rate,
                auto_respond: config.auto_respond,
                learning: config.learning,
                defaults: config.defaults.clone(),
            }),
            counters: Counters::default(),
        }
    }

    fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn with_settings(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        f(&mut settings);
    }

    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    /// Pick a response for `event`, or `None` when there is nothing to send.
    pub fn decide(&self, event: &PromptEvent) -> Option<ResponseDecision> {
        let settings = self.settings();
        if !settings.auto_respond {
            return None;
        }

        if let Some(pattern) = self.store.get(&event.normalized_signature) {
            if pattern.confidence >= settings.threshold {
                self.counters.learned.fetch_add(1, Ordering::Relaxed);
                debug!(
                    signature = %event.normalized_signature,
                    value = %pattern.response_value,
                    confidence = pattern.confidence,
                    "using learned response"
                );
                return Some(ResponseDecision {
                    value: pattern.response_value,
                    confidence: pattern.confidence,
                    source: ResponseSource::Learned,
                });
            }
        }

        let value = settings
            .defaults
            .for_prompt(event.prompt_type, event.options.len())?;
        self.counters.default.fetch_add(1, Ordering::Relaxed);
        Some(ResponseDecision {
            value: value.to_string(),
            confidence: settings.baseline,
            source: ResponseSource::Default,
        })
    }

    /// Feed the outcome of a sent response back into the store.
    ///
    /// Returns the updated pattern, or `None` when learning is disabled.
    pub fn record_outcome(
        &self,
        event: &PromptEvent,
        decision: &ResponseDecision,
        outcome: &Outcome,
    ) -> Option<LearnedPattern> {
        let settings = self.settings();
        if !settings.learning {
            return None;
        }

        let observed = match outcome {
            Outcome::Accepted => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                decision.value.as_str()
            }
            Outcome::Corrected(value) => {
                self.counters.corrected.fetch_add(1, Ordering::Relaxed);
                value.as_str()
            }
        };

        let pattern = observe(&self.store, &settings, &event.normalized_signature, observed);
        info!(
            signature = %pattern.signature,
            value = %pattern.response_value,
            confidence = pattern.confidence,
            hits = pattern.hit_count,
            outcome = ?outcome,
            "recorded response outcome"
        );
        Some(pattern)
    }

    /// Learn `value` as the operator's own answer to a prompt that got no
    /// automated response. Repeating the stored value reinforces it.
    pub fn learn_answer(&self, event: &PromptEvent, value: &str) -> Option<LearnedPattern> {
        let settings = self.settings();
        if !settings.learning {
            return None;
        }
        self.counters.answered.fetch_add(1, Ordering::Relaxed);
        let pattern = observe(&self.store, &settings, &event.normalized_signature, value);
        info!(
            signature = %pattern.signature,
            value = %pattern.response_value,
            confidence = pattern.confidence,
            "learned operator answer"
        );
        Some(pattern)
    }

    /// Replace the default response for a prompt type. `None` disables it.
    pub fn set_default(&self, prompt_type: PromptType, value: Option<String>) {
        info!(prompt_type = %prompt_type, value = ?value, "default response changed");
        self.with_settings(|s| s.defaults.set(prompt_type, value));
    }

    pub fn default_for(&self, prompt_type: PromptType) -> Option<String> {
        self.settings()
            .defaults
            .get(prompt_type)
            .map(str::to_string)
    }

    /// Change the confidence a learned pattern needs before it is used.
    pub fn set_threshold(&self, threshold: f64) -> Result<(), YesmanError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(YesmanError::ConfigError(format!(
                "confidence threshold must be within [0, 1], got {threshold}"
            )));
        }
        info!(threshold, "confidence threshold changed");
        self.with_settings(|s| s.threshold = threshold);
        Ok(())
    }

    pub fn threshold(&self) -> f64 {
        self.settings().threshold
    }

    pub fn enable_auto_response(&self, enabled: bool) {
        self.with_settings(|s| s.auto_respond = enabled);
    }

    pub fn auto_response_enabled(&self) -> bool {
        self.settings().auto_respond
    }

    pub fn enable_learning(&self, enabled: bool) {
        self.with_settings(|s| s.learning = enabled);
    }

    pub fn learning_enabled(&self) -> bool {
        self.settings().learning
    }

    pub fn stats(&self) -> ResponderStats {
        ResponderStats {
            learned_decisions: self.counters.learned.load(Ordering::Relaxed),
            default_decisions: self.counters.default.load(Ordering::Relaxed),
            acceptances: self.counters.accepted.load(Ordering::Relaxed),
            corrections: self.counters.corrected.load(Ordering::Relaxed),
            operator_answers: self.counters.answered.load(Ordering::Relaxed),
            patterns_stored: self.store.len(),
        }
    }
}

/// Fold one observed answer into the pattern for `signature`.
fn observe(
    store: &PatternStore,
    settings: &Settings,
    signature: &str,
    observed: &str,
) -> LearnedPattern {
    store.update(signature, |p| {
        if !p.is_vacant() && p.response_value == observed {
            p.hit_count += 1;
            p.confidence = reinforce(p.confidence, settings.rate);
        } else {
            p.response_value = observed.to_string();
            p.hit_count = 1;
            p.confidence = settings.baseline;
        }
        p.last_used_at = Utc::now();
    })
}

/// Move `confidence` a fraction `rate` of the way toward 1.0.
fn reinforce(confidence: f64, rate: f64) -> f64 {
    (confidence + (1.0 - confidence) * rate).min(1.0)
}
