//! Prompt detection and adaptive auto-response for AI agents in tmux.
//!
//! Watches a terminal multiplexer pane, classifies interactive prompts in
//! newly-appeared output, and decides what to answer based on learned
//! preferences and per-type defaults.
//!
//! # Architecture
//!
//! - [`provider::SessionProvider`]: trait over the multiplexer (list, capture, send keys)
//! - [`tmux::TmuxProvider`]: provider backed by the `tmux` binary
//! - [`collector::Collector`]: snapshots panes and extracts new content
//! - [`detector::Detector`]: ordered prompt rules, signature normalization, debounce
//! - [`responder::Responder`]: confidence-scored decisions and outcome learning
//! - [`store::PatternStore`]: persisted learned patterns with a background flusher
//! - [`feed::ActivityFeed`]: bounded most-recent-first activity log
//! - [`ansi`]: escape sequence stripping

pub mod ansi;
pub mod collector;
pub mod detector;
pub mod feed;
pub mod provider;
pub mod responder;
pub mod store;
pub mod tmux;
