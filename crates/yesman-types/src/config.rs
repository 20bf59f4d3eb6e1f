//! Configuration for the automation engine.
//!
//! [`AutomationConfig`] is loaded from `yesman.toml`. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prompt::PromptType;
use crate::YesmanError;

/// Name of the configuration file inside the yesman directory.
pub const CONFIG_FILENAME: &str = "yesman.toml";

/// File name of the persisted learned-pattern store.
pub const PATTERNS_FILENAME: &str = "learned_patterns.json";

/// Base directory for yesman state (`~/.yesman`).
pub fn yesman_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".yesman")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    yesman_dir().join(CONFIG_FILENAME)
}

/// Default location of the learned-pattern store.
pub fn default_store_path() -> PathBuf {
    yesman_dir().join("ai_data").join(PATTERNS_FILENAME)
}

/// Poll loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Base interval between ticks.
    pub interval_ms: u64,
    /// Upper bound of the fixed per-pane offset added to every tick.
    pub jitter_ms: u64,
    /// How many lines of scrollback to capture per tick.
    pub capture_lines: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            jitter_ms: 250,
            capture_lines: 200,
        }
    }
}

/// Failure handling and cancellation for a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Consecutive provider failures before the controller enters ERROR.
    pub max_failures: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_secs: u64,
    /// Upper bound on any single provider call.
    pub provider_timeout_secs: u64,
    /// How long `stop()` waits for the loop before reporting STOPPED anyway.
    pub stop_grace_ms: u64,
    /// A still-unanswered prompt is re-emitted after this long.
    pub debounce_max_wait_secs: u64,
    /// A sent response with no correction within this window counts as accepted.
    pub outcome_window_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            backoff_base_ms: 500,
            backoff_cap_secs: 30,
            provider_timeout_secs: 5,
            stop_grace_ms: 2000,
            debounce_max_wait_secs: 30,
            outcome_window_secs: 30,
        }
    }
}

/// Session cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    /// Stale entries are pruned once the cache holds more than this.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5000,
            max_entries: 256,
        }
    }
}

/// Static fallback answers per prompt type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultResponses {
    pub trust: Option<String>,
    /// Numbered menus with two options.
    pub numbered: Option<String>,
    /// Numbered menus with three or more options.
    pub numbered_multi: Option<String>,
    pub yes_no: Option<String>,
    pub binary: Option<String>,
    pub unknown: Option<String>,
}

impl Default for DefaultResponses {
    fn default() -> Self {
        Self {
            trust: Some("1".into()),
            numbered: Some("1".into()),
            numbered_multi: Some("1".into()),
            yes_no: Some("y".into()),
            binary: Some("1".into()),
            unknown: None,
        }
    }
}

impl DefaultResponses {
    pub fn get(&self, prompt_type: PromptType) -> Option<&str> {
        let slot = match prompt_type {
            PromptType::Trust => &self.trust,
            PromptType::Numbered => &self.numbered,
            PromptType::YesNo => &self.yes_no,
            PromptType::Binary => &self.binary,
            PromptType::Unknown => &self.unknown,
        };
        slot.as_deref()
    }

    /// The default for a prompt with `option_count` choices. Numbered
    /// menus of three or more options use `numbered_multi`.
    pub fn for_prompt(&self, prompt_type: PromptType, option_count: usize) -> Option<&str> {
        if prompt_type == PromptType::Numbered && option_count >= 3 {
            return self.numbered_multi.as_deref();
        }
        self.get(prompt_type)
    }

    pub fn set(&mut self, prompt_type: PromptType, value: Option<String>) {
        let slot = match prompt_type {
            PromptType::Trust => &mut self.trust,
            PromptType::Numbered => &mut self.numbered,
            PromptType::YesNo => &mut self.yes_no,
            PromptType::Binary => &mut self.binary,
            PromptType::Unknown => &mut self.unknown,
        };
        *slot = value;
    }
}

/// Adaptive responder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Learned answers are used only at or above this confidence.
    pub confidence_threshold: f64,
    /// Confidence of default answers and of freshly (re)learned patterns.
    pub baseline_confidence: f64,
    /// Fraction of the remaining distance to 1.0 gained per acceptance.
    pub reinforcement_rate: f64,
    pub auto_respond: bool,
    pub learning: bool,
    pub defaults: DefaultResponses,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            baseline_confidence: 0.3,
            reinforcement_rate: 0.2,
            auto_respond: true,
            learning: true,
            defaults: DefaultResponses::default(),
        }
    }
}

/// Learned-pattern persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub flush_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            flush_interval_secs: 10,
        }
    }
}

/// Observability feed size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

/// Top-level configuration for the automation engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub poll: PollConfig,
    pub controller: ControllerConfig,
    pub cache: CacheConfig,
    pub responder: ResponderConfig,
    pub store: StoreConfig,
    pub feed: FeedConfig,
}

impl AutomationConfig {
    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, YesmanError> {
        let config: Self =
            toml::from_str(content).map_err(|e| YesmanError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, YesmanError> {
        toml::to_string_pretty(self).map_err(|e| YesmanError::ConfigError(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, YesmanError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(YesmanError::ConfigError(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), YesmanError> {
        let unit = 0.0..=1.0;
        let r = &self.responder;
        if !unit.contains(&r.confidence_threshold) {
            return Err(YesmanError::ConfigError(format!(
                "responder.confidence_threshold must be within [0, 1], got {}",
                r.confidence_threshold
            )));
        }
        if !unit.contains(&r.baseline_confidence) {
            return Err(YesmanError::ConfigError(format!(
                "responder.baseline_confidence must be within [0, 1], got {}",
                r.baseline_confidence
            )));
        }
        if !(r.reinforcement_rate > 0.0 && r.reinforcement_rate < 1.0) {
            return Err(YesmanError::ConfigError(format!(
                "responder.reinforcement_rate must be within (0, 1), got {}",
                r.reinforcement_rate
            )));
        }
        if self.poll.interval_ms == 0 {
            return Err(YesmanError::ConfigError("poll.interval_ms must be positive".into()));
        }
        if self.controller.max_failures == 0 {
            return Err(YesmanError::ConfigError(
                "controller.max_failures must be at least 1".into(),
            ));
        }
        if self.controller.provider_timeout_secs == 0 {
            return Err(YesmanError::ConfigError(
                "controller.provider_timeout_secs must be positive".into(),
            ));
        }
        if self.feed.capacity == 0 {
            return Err(YesmanError::ConfigError("feed.capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.controller.provider_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.controller.stop_grace_ms)
    }

    pub fn debounce_max_wait(&self) -> Duration {
        Duration::from_secs(self.controller.debounce_max_wait_secs)
    }

    pub fn outcome_window(&self) -> Duration {
        Duration::from_secs(self.controller.outcome_window_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.store.flush_interval_secs)
    }
}
