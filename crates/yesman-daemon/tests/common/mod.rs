//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use yesman_daemon::ControllerContext;
use yesman_pilot::provider::SessionProvider;
use yesman_pilot::responder::Responder;
use yesman_pilot::store::PatternStore;
use yesman_types::{AutomationConfig, PaneKey, ProviderError, SessionInfo};

/// How a pane shows keys sent to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Echo {
    /// On a new line of the screen.
    #[default]
    NewLine,
    /// Appended to the prompt line, followed by program output.
    SameLine,
    /// Not at all: the keys are lost.
    Swallow,
}

/// In-memory multiplexer with scripted pane text.
///
/// Keys sent to a pane are echoed the way a terminal shows typed input,
/// per the configured [`Echo`].
#[derive(Default)]
pub struct FakeProvider {
    screens: Mutex<HashMap<PaneKey, String>>,
    sent: Mutex<Vec<(PaneKey, String)>>,
    gone: Mutex<HashSet<PaneKey>>,
    capture_error: Mutex<Option<ProviderError>>,
    capture_delay: Mutex<Duration>,
    list_delay: Mutex<Duration>,
    list_calls: AtomicUsize,
    capture_calls: AtomicUsize,
    echo: Mutex<Echo>,
    failing_sends: AtomicUsize,
    send_attempts: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_screen(&self, key: &PaneKey, text: &str) {
        self.screens
            .lock()
            .unwrap()
            .insert(key.clone(), text.to_string());
    }

    /// Append a line to the pane, as new program output would.
    pub fn print(&self, key: &PaneKey, line: &str) {
        let mut screens = self.screens.lock().unwrap();
        let screen = screens.entry(key.clone()).or_default();
        if !screen.is_empty() {
            screen.push('\n');
        }
        screen.push_str(line);
    }

    pub fn set_echo(&self, echo: Echo) {
        *self.echo.lock().unwrap() = echo;
    }

    /// Make the next `n` sends fail with `SendFailed`.
    pub fn fail_sends(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Sends tried, failed ones included.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(PaneKey, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_values(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, v)| v).collect()
    }

    pub fn set_gone(&self, key: &PaneKey, gone: bool) {
        let mut set = self.gone.lock().unwrap();
        if gone {
            set.insert(key.clone());
        } else {
            set.remove(key);
        }
    }

    /// Make every capture fail with `err` until cleared.
    pub fn fail_captures(&self, err: Option<ProviderError>) {
        *self.capture_error.lock().unwrap() = err;
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

impl SessionProvider for FakeProvider {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let screens = self.screens.lock().unwrap();
        let mut sessions: HashMap<String, SessionInfo> = HashMap::new();
        for key in screens.keys() {
            sessions
                .entry(key.session.clone())
                .or_insert_with(|| SessionInfo::active(key.session.clone()))
                .panes
                .push(key.clone());
        }
        let mut sessions: Vec<SessionInfo> = sessions.into_values().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        for session in &mut sessions {
            session.panes.sort();
        }
        Ok(sessions)
    }

    fn capture_pane(&self, key: &PaneKey) -> Result<String, ProviderError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.capture_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.gone.lock().unwrap().contains(key) {
            return Err(ProviderError::PaneGone);
        }
        if let Some(err) = self.capture_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .screens
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn send_keys(&self, key: &PaneKey, text: &str) -> Result<(), ProviderError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.gone.lock().unwrap().contains(key) {
            return Err(ProviderError::PaneGone);
        }
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ProviderError::SendFailed("server busy".into()));
        }

        let echo = *self.echo.lock().unwrap();
        match echo {
            Echo::NewLine => self.print(key, text),
            Echo::SameLine => {
                {
                    let mut screens = self.screens.lock().unwrap();
                    let screen = screens.entry(key.clone()).or_default();
                    screen.push(' ');
                    screen.push_str(text);
                }
                self.print(key, "Continuing...");
            }
            Echo::Swallow => {}
        }
        self.sent
            .lock()
            .unwrap()
            .push((key.clone(), text.to_string()));
        Ok(())
    }
}

/// Fast settings so tests finish in milliseconds.
pub fn test_config() -> AutomationConfig {
    let mut config = AutomationConfig::default();
    config.poll.interval_ms = 20;
    config.poll.jitter_ms = 0;
    config.controller.backoff_base_ms = 10;
    config.controller.backoff_cap_secs = 1;
    config.controller.provider_timeout_secs = 1;
    config.controller.stop_grace_ms = 500;
    config
}

/// A controller context over `provider` with an in-memory pattern store.
pub fn context(provider: Arc<FakeProvider>, config: AutomationConfig) -> ControllerContext {
    let store = Arc::new(PatternStore::in_memory());
    context_with_store(provider, config, store)
}

pub fn context_with_store(
    provider: Arc<FakeProvider>,
    config: AutomationConfig,
    store: Arc<PatternStore>,
) -> ControllerContext {
    let responder = Arc::new(Responder::new(&config.responder, store));
    ControllerContext::new(config, provider, responder)
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub const WAIT: Duration = Duration::from_secs(3);

pub fn pane(session: &str) -> PaneKey {
    PaneKey::new(session, 0, 0)
}
