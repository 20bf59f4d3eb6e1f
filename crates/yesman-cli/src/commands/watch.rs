//! Foreground monitoring of one tmux pane.
//!
//! `yesman watch <session> [--window N] [--pane N] [--no-auto]`
//!
//! Starts a controller for the pane and echoes its activity feed to stdout.
//! Each line read from stdin is typed into the pane as operator input, so a
//! wrong automatic answer can be corrected from the same terminal. A few
//! lines are commands instead: `:status`, `:pause`, `:resume`, `:auto on`,
//! `:auto off`. EOF stops the controller and flushes learned patterns.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::warn;

use yesman_daemon::{ControllerContext, ControllerRegistry, SessionController};
use yesman_pilot::feed::{ActivityFeed, FeedEntry, FeedKind};
use yesman_pilot::responder::Responder;
use yesman_pilot::store::PatternStore;
use yesman_pilot::tmux::tmux_available;
use yesman_types::{AutomationConfig, Outcome, PaneKey};

use crate::commands::tmux_provider;

/// Interval between checks of the activity feed.
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the `yesman watch` command.
pub fn run(
    config: AutomationConfig,
    session: &str,
    window: u32,
    pane: u32,
    no_auto: bool,
) -> Result<()> {
    if !tmux_available() {
        bail!("tmux is not installed or not on PATH");
    }
    let key = PaneKey::new(session, window, pane);

    let store = Arc::new(PatternStore::open(&config.store.path));
    let flusher = store.start_flusher(config.flush_interval());
    let responder = Arc::new(Responder::new(&config.responder, Arc::clone(&store)));
    let provider = Arc::new(tmux_provider(&config));
    let ctx = ControllerContext::new(config, provider, responder);

    let info = ctx
        .cache
        .get(&key.session)
        .with_context(|| format!("failed to query tmux session {:?}", key.session))?;
    if !info.is_active() {
        bail!("no tmux session named {:?}", key.session);
    }
    if !info.panes.is_empty() && !info.has_pane(&key) {
        bail!("session {:?} has no pane {}", key.session, key.target());
    }

    let registry = ControllerRegistry::new(ctx.clone());
    let controller = registry.controller(&key)?;
    if no_auto {
        controller.set_auto_respond(false);
    }
    registry.start(&key)?;

    println!("Watching {key} ({} learned patterns).", store.len());
    println!("Type a line to send it to the pane, :status for status, Ctrl-D to stop.");

    let shutdown = Arc::new(AtomicBool::new(false));
    let printer = spawn_feed_printer(ctx.feed.clone(), Arc::clone(&shutdown))?;

    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        handle_line(&controller, &line);
    }

    registry.stop_all();
    shutdown.store(true, Ordering::SeqCst);
    let _ = printer.join();

    let status = controller.status();
    println!(
        "Stopped {key}: {} prompts, {} responses ({} learned, {} default), {} corrections.",
        status.stats.prompts_detected,
        status.stats.responses_sent,
        status.stats.learned_responses,
        status.stats.default_responses,
        status.stats.corrections,
    );

    if let Err(e) = flusher.shutdown() {
        warn!(error = %e, "learned patterns were not saved");
    }
    Ok(())
}

fn handle_line(controller: &SessionController, line: &str) {
    let result = match line.trim() {
        ":status" => {
            print_status(controller);
            return;
        }
        ":pause" => controller.pause().map(|_| ()),
        ":resume" => controller.resume().map(|_| ()),
        ":restart" => controller.restart().map(|_| ()),
        ":auto on" => {
            controller.set_auto_respond(true);
            Ok(())
        }
        ":auto off" => {
            controller.set_auto_respond(false);
            Ok(())
        }
        _ => {
            if let Err(e) = controller.send_input(line) {
                eprintln!("failed to send input: {e}");
            }
            return;
        }
    };
    if let Err(e) = result {
        eprintln!("{e}");
    }
}

fn print_status(controller: &SessionController) {
    let status = controller.status();
    println!("  State:        {}", status.state);
    println!(
        "  Auto-respond: {}",
        if status.auto_respond { "on" } else { "off" }
    );
    println!("  Failures:     {}", status.consecutive_failures);
    if let Some(err) = &status.last_error {
        println!("  Last error:   {err}");
    }
    if let Some(at) = status.last_activity_at {
        println!("  Last active:  {}", at.format(super::DATETIME_FMT));
    }
    println!(
        "  Prompts:      {} detected, {} answered",
        status.stats.prompts_detected, status.stats.responses_sent
    );
}

fn spawn_feed_printer(
    feed: ActivityFeed,
    shutdown: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("yesman-feed".into())
        .spawn(move || {
            let mut last_seq = 0;
            while !shutdown.load(Ordering::SeqCst) {
                for entry in feed.since(last_seq) {
                    println!("{}", format_entry(&entry));
                    last_seq = entry.seq;
                }
                thread::sleep(FEED_POLL_INTERVAL);
            }
        })
        .context("failed to spawn feed printer")
}

/// One line of human-readable feed output.
pub fn format_entry(entry: &FeedEntry) -> String {
    let at = entry.at.format("%H:%M:%S");
    let what = match &entry.kind {
        FeedKind::PromptDetected {
            prompt_type,
            signature,
            retry,
        } => {
            let retry = if *retry { " (retry)" } else { "" };
            format!("prompt {prompt_type}{retry}: {signature}")
        }
        FeedKind::Responded {
            value,
            confidence,
            source,
        } => format!("answered {value:?} ({source:?}, confidence {confidence:.2})"),
        FeedKind::OutcomeRecorded { signature, outcome } => match outcome {
            Outcome::Accepted => format!("accepted: {signature}"),
            Outcome::Corrected(value) => format!("corrected to {value:?}: {signature}"),
        },
        FeedKind::InputSent { text } => format!("sent {text:?}"),
        FeedKind::OperatorAnswered { signature, value } => {
            format!("learned {value:?}: {signature}")
        }
        FeedKind::StateChanged { from, to } => format!("{from} -> {to}"),
        FeedKind::Failure { error, consecutive } => {
            format!("failure #{consecutive}: {error}")
        }
    };
    format!("[{at}] {}  {what}", entry.pane)
}
