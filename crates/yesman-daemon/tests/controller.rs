//! Integration tests for the session controller poll loop and lifecycle.
//!
//! Every test drives a real controller thread against the in-memory
//! `FakeProvider` from common/.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use yesman_daemon::SessionController;
use yesman_pilot::feed::FeedKind;
use yesman_types::{ControllerError, ControllerState, ProviderError, ResponseSource};

use common::{context, pane, test_config, wait_until, Echo, FakeProvider, WAIT};

const CONTINUE: &str = "Do you want to continue? (y/n)";
const CONTINUE_SIG: &str = "do you want to continue? (y/n)";

fn running(controller: &SessionController) -> bool {
    wait_until(WAIT, || controller.state() == ControllerState::Running)
}

fn responded(feed: &yesman_pilot::feed::ActivityFeed) -> bool {
    feed.since(0)
        .iter()
        .any(|e| matches!(e.kind, FeedKind::Responded { .. }))
}

fn prompt_retries(feed: &yesman_pilot::feed::ActivityFeed) -> Vec<bool> {
    feed.since(0)
        .into_iter()
        .filter_map(|e| match e.kind {
            FeedKind::PromptDetected { retry, .. } => Some(retry),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Prompt handling
// ---------------------------------------------------------------------------

#[test]
fn test_yes_no_prompt_answered_with_default() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, &format!("Compiling...\n{CONTINUE}"));

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    assert_eq!(controller.state(), ControllerState::Created);
    assert_eq!(controller.start().unwrap(), ControllerState::Starting);

    assert!(wait_until(WAIT, || responded(&ctx.feed)));
    assert_eq!(provider.sent(), vec![(key.clone(), "y".to_string())]);

    let detected = ctx.feed.recent_for(&key, 50).into_iter().find_map(|e| match e.kind {
        FeedKind::PromptDetected {
            signature, retry, ..
        } => Some((signature, retry)),
        _ => None,
    });
    assert_eq!(detected, Some((CONTINUE_SIG.to_string(), false)));

    let responded = ctx.feed.recent_for(&key, 50).into_iter().find_map(|e| match e.kind {
        FeedKind::Responded {
            value,
            confidence,
            source,
        } => Some((value, confidence, source)),
        _ => None,
    });
    assert_eq!(responded, Some(("y".to_string(), 0.3, ResponseSource::Default)));

    // The echoed answer is new content but not a prompt.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(provider.sent().len(), 1);

    let status = controller.status();
    assert_eq!(status.state, ControllerState::Running);
    assert_eq!(status.stats.prompts_detected, 1);
    assert_eq!(status.stats.responses_sent, 1);
    assert_eq!(status.stats.default_responses, 1);
    assert!(status.last_activity_at.is_some());

    controller.stop().unwrap();
}

#[test]
fn test_repeated_acceptance_switches_to_learned_response() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ agent run");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));

    // Each new occurrence accepts the previous answer.
    for round in 1..=6 {
        provider.print(&key, CONTINUE);
        assert!(
            wait_until(WAIT, || provider.sent().len() == round),
            "round {round} was not answered"
        );
    }

    let last_source = || {
        ctx.feed.recent_for(&key, 50).into_iter().find_map(|e| match e.kind {
            FeedKind::Responded { source, .. } => Some(source),
            _ => None,
        })
    };
    assert!(wait_until(WAIT, || last_source() == Some(ResponseSource::Learned)));

    let pattern = ctx.responder.store().get(CONTINUE_SIG).unwrap();
    assert_eq!(pattern.response_value, "y");
    assert_eq!(pattern.hit_count, 5);
    assert!((pattern.confidence - 0.71328).abs() < 1e-9);

    let status = controller.status();
    assert_eq!(status.stats.default_responses, 5);
    assert_eq!(status.stats.learned_responses, 1);

    controller.stop().unwrap();
}

#[test]
fn test_operator_input_corrects_pending_response() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || controller.status().stats.responses_sent == 1));

    controller.send_input("n").unwrap();
    assert!(wait_until(WAIT, || ctx.responder.store().get(CONTINUE_SIG).is_some()));

    let pattern = ctx.responder.store().get(CONTINUE_SIG).unwrap();
    assert_eq!(pattern.response_value, "n");
    assert_eq!(pattern.hit_count, 1);
    assert!((pattern.confidence - 0.3).abs() < 1e-9);
    assert_eq!(controller.status().stats.corrections, 1);
    assert_eq!(provider.sent_values(), vec!["y", "n"]);

    controller.stop().unwrap();
}

#[test]
fn test_answer_echoed_on_prompt_line_is_sent_once() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_echo(Echo::SameLine);
    provider.set_screen(&key, CONTINUE);

    let controller = SessionController::new(key, context(provider.clone(), test_config())).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || provider.sent().len() == 1));

    thread::sleep(Duration::from_millis(400));
    assert_eq!(provider.sent_values(), vec!["y"]);
    assert_eq!(controller.status().stats.prompts_detected, 1);

    controller.stop().unwrap();
}

#[test]
fn test_chat_input_after_response_is_not_a_correction() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key, ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || controller.status().stats.responses_sent == 1));

    controller.send_input("also add tests").unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(ctx.responder.store().get(CONTINUE_SIG).is_none());
    assert_eq!(controller.status().stats.corrections, 0);

    // The response is still pending, so a real choice corrects it.
    controller.send_input("n").unwrap();
    assert!(wait_until(WAIT, || ctx
        .responder
        .store()
        .get(CONTINUE_SIG)
        .is_some_and(|p| p.response_value == "n")));
    assert_eq!(controller.status().stats.corrections, 1);

    controller.stop().unwrap();
}

#[test]
fn test_operator_answer_to_unknown_prompt_is_learned() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "Enter project name:");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || controller.status().stats.prompts_detected == 1));
    assert!(provider.sent().is_empty());

    controller.send_input("yesman").unwrap();
    assert!(wait_until(WAIT, || ctx.feed.recent_for(&key, 50).into_iter().any(|e| {
        matches!(e.kind, FeedKind::OperatorAnswered { ref value, .. } if value == "yesman")
    })));

    assert_eq!(controller.status().stats.operator_answers, 1);
    let pattern = ctx.responder.store().get("enter project name:").unwrap();
    assert_eq!(pattern.response_value, "yesman");
    assert!((pattern.confidence - 0.3).abs() < 1e-9);

    controller.stop().unwrap();
}

#[test]
fn test_learned_answer_applies_to_unknown_prompt() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "Build finished\nDo you want to apply these changes?");

    let ctx = context(provider.clone(), test_config());
    ctx.responder
        .store()
        .update("do you want to apply these changes?", |p| {
            p.response_value = "n".into();
            p.hit_count = 6;
            p.confidence = 0.8;
        });

    let controller = SessionController::new(key, ctx).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || controller.status().stats.learned_responses == 1));
    assert_eq!(provider.sent_values(), vec!["n"]);

    controller.stop().unwrap();
}

#[test]
fn test_response_invalidates_session_cache() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ agent run");

    let ctx = context(provider.clone(), test_config());
    ctx.cache.get("proj-a").unwrap();
    ctx.cache.get("proj-a").unwrap();
    assert_eq!(provider.list_calls(), 1);

    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));
    provider.print(&key, CONTINUE);
    assert!(wait_until(WAIT, || responded(&ctx.feed)));

    ctx.cache.get("proj-a").unwrap();
    assert_eq!(provider.list_calls(), 2);

    controller.stop().unwrap();
}

#[test]
fn test_learned_pattern_above_threshold_is_used() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);

    let ctx = context(provider.clone(), test_config());
    ctx.responder.store().update(CONTINUE_SIG, |p| {
        p.response_value = "n".into();
        p.hit_count = 9;
        p.confidence = 0.9;
    });

    let controller = SessionController::new(key, ctx).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || controller.status().stats.learned_responses == 1));
    assert_eq!(provider.sent_values(), vec!["n"]);

    controller.stop().unwrap();
}

#[test]
fn test_auto_respond_off_detects_without_sending() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);

    let controller = SessionController::new(key, context(provider.clone(), test_config())).unwrap();
    controller.set_auto_respond(false);
    controller.start().unwrap();

    assert!(wait_until(WAIT, || controller.status().stats.prompts_detected == 1));
    thread::sleep(Duration::from_millis(100));
    assert!(provider.sent().is_empty());
    assert!(controller.is_waiting_for_input());
    assert!(!controller.status().auto_respond);

    controller.stop().unwrap();
}

#[test]
fn test_paused_controller_does_not_capture() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let controller = SessionController::new(key.clone(), context(provider.clone(), test_config())).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));

    assert_eq!(controller.pause().unwrap(), ControllerState::Paused);
    // Let any in-flight tick finish.
    thread::sleep(Duration::from_millis(60));
    let captures = provider.capture_calls();
    provider.print(&key, CONTINUE);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(provider.capture_calls(), captures);
    assert!(provider.sent().is_empty());
    assert_eq!(controller.state(), ControllerState::Paused);

    assert_eq!(controller.resume().unwrap(), ControllerState::Running);
    assert!(wait_until(WAIT, || provider.sent().len() == 1));

    controller.stop().unwrap();
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_three_timeouts_enter_error_until_restart() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));

    provider.fail_captures(Some(ProviderError::Timeout(Duration::from_secs(1))));
    assert!(wait_until(WAIT, || controller.state() == ControllerState::Error));

    let status = controller.status();
    assert_eq!(status.consecutive_failures, 3);
    assert!(status.last_error.unwrap().contains("timed out"));

    // No polling in ERROR.
    assert!(wait_until(WAIT, || ctx.live_loops() == 0));
    let captures = provider.capture_calls();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(provider.capture_calls(), captures);

    assert_eq!(controller.start(), Err(ControllerError::RequiresRestart));

    provider.fail_captures(None);
    assert_eq!(controller.restart().unwrap(), ControllerState::Starting);
    assert!(running(&controller));
    assert_eq!(controller.status().consecutive_failures, 0);

    controller.stop().unwrap();
}

#[test]
fn test_failures_below_cap_recover() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let mut config = test_config();
    config.controller.max_failures = 50;
    let controller = SessionController::new(key, context(provider.clone(), config)).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));

    provider.fail_captures(Some(ProviderError::Unavailable("server restarting".into())));
    assert!(wait_until(WAIT, || controller.status().consecutive_failures >= 1));
    provider.fail_captures(None);

    assert!(wait_until(WAIT, || controller.status().consecutive_failures == 0));
    assert_eq!(controller.state(), ControllerState::Running);
    assert!(controller.status().last_error.is_none());

    controller.stop().unwrap();
}

#[test]
fn test_failed_send_is_retried_once() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);
    provider.fail_sends(1);

    let controller = SessionController::new(key, context(provider.clone(), test_config())).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || controller.status().stats.responses_sent == 1));

    assert_eq!(provider.sent_values(), vec!["y"]);
    assert_eq!(provider.send_attempts(), 2);
    let status = controller.status();
    assert_eq!(status.stats.responses_sent, 1);
    assert_eq!(status.stats.send_failures, 0);
    assert_eq!(status.consecutive_failures, 0);

    controller.stop().unwrap();
}

#[test]
fn test_send_failing_twice_counts_one_failure() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);
    provider.fail_sends(2);

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(wait_until(WAIT, || ctx
        .feed
        .since(0)
        .iter()
        .any(|e| matches!(e.kind, FeedKind::Failure { .. }))));

    assert_eq!(controller.status().stats.send_failures, 1);
    assert_eq!(provider.send_attempts(), 2);
    assert!(provider.sent().is_empty());
    let failures: Vec<u32> = ctx
        .feed
        .recent_for(&key, 50)
        .into_iter()
        .filter_map(|e| match e.kind {
            FeedKind::Failure { consecutive, .. } => Some(consecutive),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![1]);
    assert_eq!(controller.state(), ControllerState::Running);

    controller.stop().unwrap();
}

#[test]
fn test_unsent_response_is_retried_after_max_wait() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, CONTINUE);
    provider.fail_sends(2);

    let mut config = test_config();
    config.controller.debounce_max_wait_secs = 1;
    let ctx = context(provider.clone(), config);
    let controller = SessionController::new(key, ctx.clone()).unwrap();
    controller.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        controller.status().stats.responses_sent == 1
    }));
    assert_eq!(provider.sent_values(), vec!["y"]);
    assert_eq!(provider.send_attempts(), 3);
    assert_eq!(prompt_retries(&ctx.feed), vec![false, true]);

    let status = controller.status();
    assert_eq!(status.state, ControllerState::Running);
    assert_eq!(status.stats.responses_sent, 1);
    assert_eq!(status.stats.send_failures, 1);

    controller.stop().unwrap();
}

#[test]
fn test_lost_keystroke_is_resent_once() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_echo(Echo::Swallow);
    provider.set_screen(&key, CONTINUE);

    let mut config = test_config();
    config.controller.debounce_max_wait_secs = 1;
    let ctx = context(provider.clone(), config);
    let controller = SessionController::new(key, ctx.clone()).unwrap();
    controller.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || provider.sent().len() == 2));
    assert_eq!(provider.sent_values(), vec!["y", "y"]);
    assert_eq!(prompt_retries(&ctx.feed), vec![false, true]);

    // One resend only, even though the screen never changes.
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(provider.sent().len(), 2);

    controller.stop().unwrap();
}

#[test]
fn test_pane_gone_is_immediately_terminal() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));

    provider.set_gone(&key, true);
    assert!(wait_until(WAIT, || controller.state() == ControllerState::Error));
    assert_eq!(controller.status().consecutive_failures, 0);
    assert_eq!(controller.start(), Err(ControllerError::RequiresRestart));

    let failure = ctx.feed.recent_for(&key, 50).into_iter().any(|e| {
        matches!(e.kind, FeedKind::StateChanged { to: ControllerState::Error, .. })
    });
    assert!(failure);

    // stop leaves ERROR in place.
    assert_eq!(controller.stop().unwrap(), ControllerState::Error);

    provider.set_gone(&key, false);
    controller.restart().unwrap();
    assert!(running(&controller));
    controller.stop().unwrap();
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_stop_leaves_no_live_worker() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key, ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));
    assert_eq!(ctx.live_loops(), 1);

    assert_eq!(controller.stop().unwrap(), ControllerState::Stopped);
    assert_eq!(ctx.live_loops(), 0);
    assert_eq!(controller.state(), ControllerState::Stopped);

    // STOPPED accepts start again.
    controller.start().unwrap();
    assert!(running(&controller));
    assert_eq!(ctx.live_loops(), 1);
    controller.stop().unwrap();
    assert_eq!(ctx.live_loops(), 0);
}

#[test]
fn test_concurrent_starts_spawn_one_loop() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let ctx = context(provider.clone(), test_config());
    let controller = Arc::new(SessionController::new(key, ctx.clone()).unwrap());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                controller.start().unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        assert!(ctx.live_loops() <= 1);
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ctx.live_loops(), 1);

    controller.stop().unwrap();
    assert_eq!(ctx.live_loops(), 0);
}

#[test]
fn test_restart_never_overlaps_loops() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key, ctx.clone()).unwrap();
    controller.start().unwrap();

    for _ in 0..5 {
        controller.restart().unwrap();
        assert!(ctx.live_loops() <= 1);
    }
    assert!(running(&controller));
    controller.stop().unwrap();
    assert_eq!(ctx.live_loops(), 0);
}

#[test]
fn test_stop_returns_within_grace_while_capture_hangs() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let mut config = test_config();
    config.controller.stop_grace_ms = 50;
    let ctx = context(provider.clone(), config);
    let controller = SessionController::new(key, ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));

    provider.set_capture_delay(Duration::from_millis(600));
    // Wait for the loop to enter the slow capture.
    thread::sleep(Duration::from_millis(60));

    let started = Instant::now();
    assert_eq!(controller.stop().unwrap(), ControllerState::Stopped);
    assert!(started.elapsed() < Duration::from_millis(400));

    // start waits for the cancelled loop to drain before spawning.
    provider.set_capture_delay(Duration::ZERO);
    controller.start().unwrap();
    assert!(ctx.live_loops() <= 1);
    assert!(running(&controller));
    controller.stop().unwrap();
    assert_eq!(ctx.live_loops(), 0);
}

#[test]
fn test_state_changes_reach_the_feed() {
    let provider = FakeProvider::new();
    let key = pane("proj-a");
    provider.set_screen(&key, "$ idle");

    let ctx = context(provider.clone(), test_config());
    let controller = SessionController::new(key.clone(), ctx.clone()).unwrap();
    controller.start().unwrap();
    assert!(running(&controller));
    controller.stop().unwrap();

    let transitions: Vec<(ControllerState, ControllerState)> = ctx
        .feed
        .recent_for(&key, 50)
        .into_iter()
        .rev()
        .filter_map(|e| match e.kind {
            FeedKind::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (ControllerState::Created, ControllerState::Starting),
            (ControllerState::Starting, ControllerState::Running),
            (ControllerState::Running, ControllerState::Stopping),
            (ControllerState::Stopping, ControllerState::Stopped),
        ]
    );
}
