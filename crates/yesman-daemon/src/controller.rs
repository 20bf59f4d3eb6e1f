//! Per-pane session controller.
//!
//! A `SessionController` owns the poll loop for one pane: capture, classify,
//! decide, send keys, learn. Lifecycle calls (`start`, `stop`, `restart`,
//! `pause`, `resume`) are queued to a dedicated command thread that is the
//! only writer of lifecycle state, so concurrent callers are serialized and
//! two poll loops for one pane can never run at once.
//!
//! Each run of the poll loop gets its own cancellation token. A stopped run
//! whose provider call is still in flight keeps its thread until the call
//! returns, then exits without acting; `start` and `restart` refuse to spawn
//! a new run until that thread is gone.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use yesman_pilot::collector::{Capture, Collector};
use yesman_pilot::detector::Detector;
use yesman_pilot::feed::{ActivityFeed, FeedKind};
use yesman_pilot::provider::SessionProvider;
use yesman_pilot::responder::Responder;
use yesman_types::{
    AutomationConfig, ControllerError, ControllerState, ControllerStatus, Outcome, PaneKey,
    PromptEvent, ProviderError, ResponseDecision, ResponseSource,
};

use crate::cache::SessionCache;

/// Shared engine pieces every controller works with.
#[derive(Clone)]
pub struct ControllerContext {
    pub provider: Arc<dyn SessionProvider>,
    pub responder: Arc<Responder>,
    pub cache: Arc<SessionCache>,
    pub feed: ActivityFeed,
    pub config: Arc<AutomationConfig>,
    live_loops: Arc<AtomicUsize>,
}

impl ControllerContext {
    /// Build a context, creating the session cache and activity feed from `config`.
    pub fn new(
        config: AutomationConfig,
        provider: Arc<dyn SessionProvider>,
        responder: Arc<Responder>,
    ) -> Self {
        let cache = Arc::new(SessionCache::new(Arc::clone(&provider), &config.cache));
        let feed = ActivityFeed::new(config.feed.capacity);
        Self {
            provider,
            responder,
            cache,
            feed,
            config: Arc::new(config),
            live_loops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of poll loop threads currently alive across all controllers.
    pub fn live_loops(&self) -> usize {
        self.live_loops.load(Ordering::SeqCst)
    }
}

/// Last captured pane text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneSnapshot {
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Start,
    Stop,
    Restart,
    Pause,
    Resume,
}

struct LifecycleRequest {
    op: Lifecycle,
    reply: Sender<Result<ControllerState, ControllerError>>,
}

/// Messages from the controller handle to its running poll loop.
#[derive(Debug)]
enum OperatorCommand {
    /// The operator typed this into the pane.
    Input(String),
}

/// State shared between the handle, the command thread, and the poll loop.
struct Shared {
    key: PaneKey,
    status: Mutex<ControllerStatus>,
    snapshot: Mutex<Option<PaneSnapshot>>,
    paused: AtomicBool,
    auto_respond: AtomicBool,
    /// Command channel of the current run, if any.
    operator_tx: Mutex<Option<Sender<OperatorCommand>>>,
    feed: ActivityFeed,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn state(&self) -> ControllerState {
        lock(&self.status).state
    }

    /// Transition unless `token` (the writer's run) has been cancelled.
    fn transition(&self, to: ControllerState, token: Option<&AtomicBool>) {
        self.transition_if(|_| true, to, token);
    }

    /// Transition only when the current state satisfies `allowed`.
    fn transition_if(
        &self,
        allowed: impl FnOnce(ControllerState) -> bool,
        to: ControllerState,
        token: Option<&AtomicBool>,
    ) {
        let mut status = lock(&self.status);
        if token.is_some_and(|t| t.load(Ordering::SeqCst)) {
            return;
        }
        let from = status.state;
        if from == to || !allowed(from) {
            return;
        }
        status.state = to;
        drop(status);

        info!(pane = %self.key, from = %from, to = %to, "controller state changed");
        self.feed.push(&self.key, FeedKind::StateChanged { from, to });
    }

    fn update(&self, f: impl FnOnce(&mut ControllerStatus)) {
        f(&mut lock(&self.status));
    }
}

/// Handle to the controller for one pane.
pub struct SessionController {
    key: PaneKey,
    shared: Arc<Shared>,
    ctx: ControllerContext,
    lifecycle_tx: Sender<LifecycleRequest>,
    /// Stateless classification for `is_waiting_for_input`.
    detector: Detector,
}

impl SessionController {
    /// Create a controller in `Created` state and spawn its command thread.
    pub fn new(key: PaneKey, ctx: ControllerContext) -> Result<Self, ControllerError> {
        let auto_respond = ctx.config.responder.auto_respond;
        let shared = Arc::new(Shared {
            key: key.clone(),
            status: Mutex::new(ControllerStatus {
                auto_respond,
                ..ControllerStatus::default()
            }),
            snapshot: Mutex::new(None),
            paused: AtomicBool::new(false),
            auto_respond: AtomicBool::new(auto_respond),
            operator_tx: Mutex::new(None),
            feed: ctx.feed.clone(),
        });

        let (lifecycle_tx, lifecycle_rx) = mpsc::channel();
        let mut commander = Commander {
            key: key.clone(),
            shared: Arc::clone(&shared),
            ctx: ctx.clone(),
            run: None,
            draining: None,
        };
        thread::Builder::new()
            .name(format!("yesman-ctl-{key}"))
            .spawn(move || commander.serve(lifecycle_rx))
            .map_err(|e| ControllerError::SpawnFailed(e.to_string()))?;

        let detector = Detector::new(ctx.config.debounce_max_wait());
        Ok(Self {
            key,
            shared,
            ctx,
            lifecycle_tx,
            detector,
        })
    }

    pub fn key(&self) -> &PaneKey {
        &self.key
    }

    fn request(&self, op: Lifecycle) -> Result<ControllerState, ControllerError> {
        let (reply, rx) = mpsc::channel();
        self.lifecycle_tx
            .send(LifecycleRequest { op, reply })
            .map_err(|_| ControllerError::Closed)?;
        rx.recv().map_err(|_| ControllerError::Closed)?
    }

    /// Begin monitoring. A no-op while a loop is already live; rejected in
    /// `Error`, which needs [`restart`](Self::restart).
    pub fn start(&self) -> Result<ControllerState, ControllerError> {
        self.request(Lifecycle::Start)
    }

    /// Stop monitoring. Returns once the loop exits or the stop grace elapses.
    pub fn stop(&self) -> Result<ControllerState, ControllerError> {
        self.request(Lifecycle::Stop)
    }

    /// Stop any running loop and start a fresh one, clearing failure state.
    pub fn restart(&self) -> Result<ControllerState, ControllerError> {
        self.request(Lifecycle::Restart)
    }

    pub fn pause(&self) -> Result<ControllerState, ControllerError> {
        self.request(Lifecycle::Pause)
    }

    pub fn resume(&self) -> Result<ControllerState, ControllerError> {
        self.request(Lifecycle::Resume)
    }

    pub fn status(&self) -> ControllerStatus {
        lock(&self.shared.status).clone()
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    /// The most recent capture of the pane, if any.
    pub fn snapshot(&self) -> Option<PaneSnapshot> {
        lock(&self.shared.snapshot).clone()
    }

    /// Whether the last capture looks like it is waiting for input.
    pub fn is_waiting_for_input(&self) -> bool {
        let Some(snapshot) = self.snapshot() else {
            return false;
        };
        self.detector.is_waiting_for_input(&snapshot.text)
    }

    /// Enable or disable automatic responses for this pane.
    pub fn set_auto_respond(&self, enabled: bool) {
        self.shared.auto_respond.store(enabled, Ordering::SeqCst);
        self.shared.update(|s| s.auto_respond = enabled);
        info!(pane = %self.key, enabled, "auto-respond changed");
    }

    /// Type `text` into the pane on the operator's behalf.
    ///
    /// While a prompt is pending, input that picks one of its options is
    /// recorded: as the outcome of an automated response (a bare Enter
    /// accepts it), or as a learned answer when nothing was sent. Input that
    /// matches no option is just typed.
    pub fn send_input(&self, text: &str) -> Result<(), ProviderError> {
        self.ctx.provider.send_keys(&self.key, text)?;
        self.ctx.cache.invalidate(&self.key.session);
        self.shared.update(|s| s.last_activity_at = Some(Utc::now()));
        self.ctx.feed.push(
            &self.key,
            FeedKind::InputSent {
                text: text.to_string(),
            },
        );

        if let Some(tx) = lock(&self.shared.operator_tx).as_ref() {
            let _ = tx.send(OperatorCommand::Input(text.to_string()));
        }
        Ok(())
    }
}

/// A spawned poll loop.
struct Run {
    token: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The single writer of lifecycle state. Runs on the command thread.
struct Commander {
    key: PaneKey,
    shared: Arc<Shared>,
    ctx: ControllerContext,
    run: Option<Run>,
    /// A cancelled run whose thread had not exited within the stop grace.
    draining: Option<JoinHandle<()>>,
}

impl Commander {
    fn serve(&mut self, rx: Receiver<LifecycleRequest>) {
        while let Ok(request) = rx.recv() {
            let result = match request.op {
                Lifecycle::Start => self.start(),
                Lifecycle::Stop => Ok(self.stop()),
                Lifecycle::Restart => self.restart(),
                Lifecycle::Pause => Ok(self.pause()),
                Lifecycle::Resume => Ok(self.resume()),
            };
            if let Err(e) = &result {
                debug!(pane = %self.key, op = ?request.op, error = %e, "lifecycle request rejected");
            }
            let _ = request.reply.send(result);
        }

        // Handle dropped: cancel without waiting.
        if let Some(run) = self.run.take() {
            run.token.store(true, Ordering::SeqCst);
            lock(&self.shared.operator_tx).take();
        }
    }

    fn start(&mut self) -> Result<ControllerState, ControllerError> {
        match self.shared.state() {
            ControllerState::Error => Err(ControllerError::RequiresRestart),
            state if state.has_live_loop() => Ok(state),
            _ => self.spawn(),
        }
    }

    fn restart(&mut self) -> Result<ControllerState, ControllerError> {
        if self.shared.state().has_live_loop() {
            self.stop();
        }
        self.spawn()
    }

    fn pause(&mut self) -> ControllerState {
        let state = self.shared.state();
        if matches!(state, ControllerState::Starting | ControllerState::Running) {
            self.shared.paused.store(true, Ordering::SeqCst);
            self.shared.transition(ControllerState::Paused, None);
            return ControllerState::Paused;
        }
        state
    }

    fn resume(&mut self) -> ControllerState {
        if self.shared.state() == ControllerState::Paused {
            self.shared.paused.store(false, Ordering::SeqCst);
            self.shared.transition(ControllerState::Running, None);
            return ControllerState::Running;
        }
        self.shared.state()
    }

    fn stop(&mut self) -> ControllerState {
        let state = self.shared.state();
        let Some(run) = self.run.take() else {
            if state == ControllerState::Error {
                return state;
            }
            self.shared.transition(ControllerState::Stopped, None);
            return ControllerState::Stopped;
        };

        if state == ControllerState::Error {
            // The loop ended itself; just reap it.
            self.reap(run.handle);
            return state;
        }

        self.shared.transition(ControllerState::Stopping, None);
        run.token.store(true, Ordering::SeqCst);
        lock(&self.shared.operator_tx).take();
        self.shared.paused.store(false, Ordering::SeqCst);

        let grace = self.ctx.config.stop_grace();
        if !wait_finished(&run.handle, grace) {
            warn!(
                pane = %self.key,
                grace_ms = grace.as_millis() as u64,
                "poll loop still busy after stop grace, detaching"
            );
        }
        self.reap(run.handle);

        self.shared.transition(ControllerState::Stopped, None);
        info!(pane = %self.key, "controller stopped");
        ControllerState::Stopped
    }

    /// Join `handle` if it has finished, otherwise keep it as draining.
    fn reap(&mut self, handle: JoinHandle<()>) {
        if handle.is_finished() {
            if handle.join().is_err() {
                error!(pane = %self.key, "poll loop thread panicked");
            }
        } else {
            self.draining = Some(handle);
        }
    }

    /// Wait for any previous loop thread to exit.
    fn drain(&mut self) -> Result<(), ControllerError> {
        if let Some(run) = self.run.take() {
            run.token.store(true, Ordering::SeqCst);
            self.reap(run.handle);
        }
        let Some(handle) = self.draining.take() else {
            return Ok(());
        };
        let wait = self.ctx.config.provider_timeout() + self.ctx.config.stop_grace();
        if wait_finished(&handle, wait) {
            let _ = handle.join();
            Ok(())
        } else {
            self.draining = Some(handle);
            Err(ControllerError::StillDraining(self.key.to_string()))
        }
    }

    fn spawn(&mut self) -> Result<ControllerState, ControllerError> {
        self.drain()?;

        let token = Arc::new(AtomicBool::new(false));
        let (operator_tx, operator_rx) = mpsc::channel();

        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.update(|s| {
            s.consecutive_failures = 0;
            s.last_error = None;
        });
        self.shared.transition(ControllerState::Starting, None);
        *lock(&self.shared.operator_tx) = Some(operator_tx);

        let poll = PollLoop::new(
            self.key.clone(),
            Arc::clone(&self.shared),
            self.ctx.clone(),
            Arc::clone(&token),
            operator_rx,
        );
        let spawned = thread::Builder::new()
            .name(format!("yesman-poll-{}", self.key))
            .spawn(move || poll.run());

        match spawned {
            Ok(handle) => {
                info!(pane = %self.key, "poll loop spawned");
                self.run = Some(Run { token, handle });
                Ok(ControllerState::Starting)
            }
            Err(e) => {
                error!(pane = %self.key, error = %e, "failed to spawn poll loop");
                lock(&self.shared.operator_tx).take();
                self.shared.update(|s| s.last_error = Some(e.to_string()));
                self.shared.transition(ControllerState::Error, None);
                Err(ControllerError::SpawnFailed(e.to_string()))
            }
        }
    }
}

fn wait_finished(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline && !handle.is_finished() {
        thread::sleep(Duration::from_millis(10));
    }
    handle.is_finished()
}

/// Fixed per-pane offset added to the poll interval, so controllers started
/// together do not poll in lockstep.
pub fn pane_jitter(key: &PaneKey, max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Duration::from_millis(hasher.finish() % (max_ms + 1))
}

/// Delay before retrying after `failures` consecutive failures.
pub fn backoff_delay(failures: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |d| d.min(cap))
}

/// The last prompt handled, until its outcome is known.
struct PendingPrompt {
    event: PromptEvent,
    /// The automated response sent, or `None` when the prompt was left to
    /// the operator.
    decision: Option<ResponseDecision>,
    since: Instant,
}

/// A prompt to look for again if the pane stays quiet.
struct Recheck {
    due: Instant,
    /// The keys reached the pane, so any change of the screen settles it.
    delivered: bool,
}

/// How operator input bears on an automated response, if at all.
fn operator_outcome(event: &PromptEvent, decision: &ResponseDecision, input: &str) -> Option<Outcome> {
    if input.is_empty() {
        return Some(Outcome::Accepted);
    }
    let choice = matching_option(&event.options, input)?;
    if choice == decision.value {
        Some(Outcome::Accepted)
    } else {
        Some(Outcome::Corrected(choice))
    }
}

/// The operator's answer to a prompt nothing was sent for. Free-form
/// prompts take any input, including a bare Enter.
fn operator_answer(event: &PromptEvent, input: &str) -> Option<String> {
    if event.options.is_empty() {
        return Some(input.to_string());
    }
    matching_option(&event.options, input)
}

fn matching_option(options: &[String], input: &str) -> Option<String> {
    let input = match input.to_ascii_lowercase().as_str() {
        "yes" => "y".to_string(),
        "no" => "n".to_string(),
        other => other.to_string(),
    };
    options.iter().find(|o| o.eq_ignore_ascii_case(&input)).cloned()
}

/// What the loop does after a tick.
enum Next {
    Sleep(Duration),
    Exit,
}

/// Decrements the live loop count when the loop thread ends.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PollLoop {
    key: PaneKey,
    shared: Arc<Shared>,
    ctx: ControllerContext,
    token: Arc<AtomicBool>,
    commands: Receiver<OperatorCommand>,
    collector: Collector,
    detector: Detector,
    pending: Option<PendingPrompt>,
    recheck: Option<Recheck>,
    failures: u32,
    interval: Duration,
}

impl PollLoop {
    fn new(
        key: PaneKey,
        shared: Arc<Shared>,
        ctx: ControllerContext,
        token: Arc<AtomicBool>,
        commands: Receiver<OperatorCommand>,
    ) -> Self {
        let config = &ctx.config;
        let jitter = pane_jitter(&key, Duration::from_millis(config.poll.jitter_ms));
        Self {
            collector: Collector::new(Arc::clone(&ctx.provider)),
            detector: Detector::new(config.debounce_max_wait()),
            interval: config.poll_interval() + jitter,
            key,
            shared,
            token,
            commands,
            pending: None,
            recheck: None,
            failures: 0,
            ctx,
        }
    }

    fn cancelled(&self) -> bool {
        self.token.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        self.ctx.live_loops.fetch_add(1, Ordering::SeqCst);
        let _guard = LiveGuard(Arc::clone(&self.ctx.live_loops));
        debug!(pane = %self.key, interval_ms = self.interval.as_millis() as u64, "poll loop started");

        loop {
            if self.cancelled() {
                break;
            }
            let wait = match self.tick() {
                Next::Sleep(d) => d,
                Next::Exit => break,
            };
            if !self.sleep(wait) {
                break;
            }
        }

        self.collector.forget(&self.key);
        self.detector.forget(&self.key);
        debug!(pane = %self.key, "poll loop exited");
    }

    /// Wait for `duration`, handling operator commands as they arrive.
    /// Returns false when the run has been cancelled.
    fn sleep(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return !self.cancelled();
            }
            match self.commands.recv_timeout(remaining) {
                Ok(command) => {
                    if self.cancelled() {
                        return false;
                    }
                    self.handle_command(command);
                }
                Err(RecvTimeoutError::Timeout) => return !self.cancelled(),
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn handle_command(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::Input(text) => {
                let Some(pending) = self.pending.take() else {
                    debug!(pane = %self.key, "operator input with no pending prompt");
                    return;
                };
                let input = text.trim();
                match pending.decision.clone() {
                    Some(decision) => match operator_outcome(&pending.event, &decision, input) {
                        Some(outcome) => {
                            self.answered_by_operator();
                            self.resolve(pending.event, decision, outcome);
                        }
                        None => self.keep_pending(pending),
                    },
                    None => match operator_answer(&pending.event, input) {
                        Some(value) => {
                            self.answered_by_operator();
                            self.learn_answer(pending.event, value);
                        }
                        None => self.keep_pending(pending),
                    },
                }
            }
        }
    }

    fn answered_by_operator(&mut self) {
        self.detector.mark_responded(&self.key);
        self.collector.mark_answered(&self.key);
        self.recheck = None;
    }

    fn keep_pending(&mut self, pending: PendingPrompt) {
        debug!(
            pane = %self.key,
            signature = %pending.event.normalized_signature,
            "operator input does not answer the pending prompt"
        );
        self.pending = Some(pending);
    }

    fn tick(&mut self) -> Next {
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command);
        }

        if self.shared.paused.load(Ordering::SeqCst) {
            return Next::Sleep(self.interval);
        }

        let capture = self.collector.capture(&self.key);
        if self.cancelled() {
            return Next::Exit;
        }
        self.shared.update(|s| s.stats.ticks += 1);

        match capture {
            Ok(Capture::PaneGone) => {
                self.fail_terminal("pane no longer exists");
                Next::Exit
            }
            Err(e) if e.is_terminal() => {
                self.fail_terminal(&e.to_string());
                Next::Exit
            }
            Err(e) => self.fail(e),
            Ok(Capture::Unchanged) => {
                self.succeed();
                if let Some(next) = self.recheck_if_due() {
                    return next;
                }
                self.expire_outcome();
                Next::Sleep(self.interval)
            }
            Ok(Capture::Changed { snapshot, new_text }) => {
                self.succeed();
                let now = Utc::now();
                *lock(&self.shared.snapshot) = Some(PaneSnapshot {
                    text: snapshot,
                    captured_at: now,
                });
                self.shared.update(|s| s.last_activity_at = Some(now));
                if self.recheck.as_ref().is_some_and(|r| r.delivered) {
                    self.recheck = None;
                }

                if let Some(event) = self.detector.classify(&self.key, &new_text) {
                    if let Some(next) = self.handle_prompt(event) {
                        return next;
                    }
                } else if let Some(next) = self.recheck_if_due() {
                    return next;
                }
                self.expire_outcome();
                Next::Sleep(self.interval)
            }
        }
    }

    /// Look for the last acted-on prompt again once the max-wait has passed
    /// without the pane reacting: the keys were lost or never sent.
    fn recheck_if_due(&mut self) -> Option<Next> {
        if !self.recheck.as_ref().is_some_and(|r| Instant::now() >= r.due) {
            return None;
        }
        self.recheck = None;
        let snapshot = self.collector.record(&self.key)?.last_snapshot.clone();
        let event = self.detector.retry(&self.key, &snapshot)?;
        self.handle_prompt(event)
    }

    /// Respond to a detected prompt. Returns `Some` when the tick must end early.
    fn handle_prompt(&mut self, event: PromptEvent) -> Option<Next> {
        self.shared.update(|s| s.stats.prompts_detected += 1);
        self.ctx.feed.push(
            &self.key,
            FeedKind::PromptDetected {
                prompt_type: event.prompt_type,
                signature: event.normalized_signature.clone(),
                retry: event.retry,
            },
        );

        if !event.retry {
            self.accept_pending();
        }
        self.recheck = None;

        let decision = if self.shared.auto_respond.load(Ordering::SeqCst) {
            self.ctx.responder.decide(&event)
        } else {
            debug!(pane = %self.key, "auto-respond disabled, leaving prompt for the operator");
            None
        };
        let Some(decision) = decision else {
            debug!(
                pane = %self.key,
                prompt_type = %event.prompt_type,
                "no automated response for prompt"
            );
            self.pending = Some(PendingPrompt {
                event,
                decision: None,
                since: Instant::now(),
            });
            return None;
        };

        let sent = self.send_with_retry(&decision.value);
        if self.cancelled() {
            return Some(Next::Exit);
        }
        if let Err(e) = sent {
            self.shared.update(|s| s.stats.send_failures += 1);
            if e.is_terminal() {
                self.fail_terminal(&e.to_string());
                return Some(Next::Exit);
            }
            self.recheck = Some(Recheck {
                due: Instant::now() + self.ctx.config.debounce_max_wait(),
                delivered: false,
            });
            return Some(self.fail(e));
        }

        self.detector.mark_responded(&self.key);
        self.collector.mark_answered(&self.key);
        if !event.retry {
            self.recheck = Some(Recheck {
                due: Instant::now() + self.ctx.config.debounce_max_wait(),
                delivered: true,
            });
        }
        self.ctx.cache.invalidate(&self.key.session);

        info!(
            pane = %self.key,
            prompt_type = %event.prompt_type,
            value = %decision.value,
            confidence = decision.confidence,
            source = ?decision.source,
            "auto-responded to prompt"
        );
        self.shared.update(|s| {
            s.stats.responses_sent += 1;
            match decision.source {
                ResponseSource::Learned => s.stats.learned_responses += 1,
                ResponseSource::Default => s.stats.default_responses += 1,
            }
            s.last_activity_at = Some(Utc::now());
        });
        self.ctx.feed.push(
            &self.key,
            FeedKind::Responded {
                value: decision.value.clone(),
                confidence: decision.confidence,
                source: decision.source,
            },
        );

        self.pending = Some(PendingPrompt {
            event,
            decision: Some(decision),
            since: Instant::now(),
        });
        None
    }

    fn send_with_retry(&self, value: &str) -> Result<(), ProviderError> {
        match self.ctx.provider.send_keys(&self.key, value) {
            Err(ProviderError::SendFailed(reason)) if !self.cancelled() => {
                debug!(pane = %self.key, reason = %reason, "send failed, retrying once");
                self.ctx.provider.send_keys(&self.key, value)
            }
            other => other,
        }
    }

    /// A new prompt appeared, so the previous automated response stood.
    fn accept_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let Some(decision) = pending.decision {
            self.resolve(pending.event, decision, Outcome::Accepted);
        }
    }

    fn expire_outcome(&mut self) {
        let window = self.ctx.config.outcome_window();
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.since.elapsed() >= window)
        {
            self.accept_pending();
        }
    }

    fn resolve(&mut self, event: PromptEvent, decision: ResponseDecision, outcome: Outcome) {
        if matches!(outcome, Outcome::Corrected(_)) {
            self.shared.update(|s| s.stats.corrections += 1);
        }
        self.ctx
            .responder
            .record_outcome(&event, &decision, &outcome);
        self.ctx.feed.push(
            &self.key,
            FeedKind::OutcomeRecorded {
                signature: event.normalized_signature,
                outcome,
            },
        );
    }

    fn learn_answer(&mut self, event: PromptEvent, value: String) {
        if self.ctx.responder.learn_answer(&event, &value).is_none() {
            return;
        }
        self.shared.update(|s| s.stats.operator_answers += 1);
        self.ctx.feed.push(
            &self.key,
            FeedKind::OperatorAnswered {
                signature: event.normalized_signature,
                value,
            },
        );
    }

    fn succeed(&mut self) {
        if self.failures > 0 {
            debug!(pane = %self.key, failures = self.failures, "provider recovered");
        }
        self.failures = 0;
        self.shared.update(|s| {
            s.consecutive_failures = 0;
            s.last_error = None;
        });
        self.shared.transition_if(
            |state| state == ControllerState::Starting,
            ControllerState::Running,
            Some(&*self.token),
        );
    }

    /// Count a recoverable failure; enter `Error` once the cap is reached.
    fn fail(&mut self, err: ProviderError) -> Next {
        self.failures += 1;
        let failures = self.failures;
        let message = err.to_string();
        self.shared.update(|s| {
            s.consecutive_failures = failures;
            s.last_error = Some(message.clone());
        });
        self.ctx.feed.push(
            &self.key,
            FeedKind::Failure {
                error: message.clone(),
                consecutive: failures,
            },
        );

        let max = self.ctx.config.controller.max_failures;
        if failures >= max {
            error!(pane = %self.key, failures, error = %message, "too many consecutive failures");
            self.shared
                .transition(ControllerState::Error, Some(&*self.token));
            return Next::Exit;
        }

        let delay = backoff_delay(
            failures,
            Duration::from_millis(self.ctx.config.controller.backoff_base_ms),
            Duration::from_secs(self.ctx.config.controller.backoff_cap_secs),
        );
        warn!(
            pane = %self.key,
            failures,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "provider call failed, backing off"
        );
        Next::Sleep(delay)
    }

    fn fail_terminal(&mut self, reason: &str) {
        error!(pane = %self.key, reason, "monitoring failed");
        self.shared.update(|s| s.last_error = Some(reason.to_string()));
        self.ctx.feed.push(
            &self.key,
            FeedKind::Failure {
                error: reason.to_string(),
                consecutive: self.failures,
            },
        );
        self.pending = None;
        self.recheck = None;
        self.shared
            .transition(ControllerState::Error, Some(&*self.token));
    }
}
