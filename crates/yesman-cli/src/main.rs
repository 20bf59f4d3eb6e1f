mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// yesman -- answers the prompts your AI agent keeps asking.
#[derive(Parser, Debug)]
#[command(name = "yesman", version, about)]
struct Cli {
    /// Path to yesman.toml (defaults to ~/.yesman/yesman.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Monitor one tmux pane and auto-respond to its prompts
    ///
    /// Lines typed on stdin are sent to the pane as operator input. Press
    /// Ctrl-D to stop.
    Watch {
        /// tmux session name
        session: String,

        /// Window index
        #[arg(long, default_value_t = 0)]
        window: u32,

        /// Pane index
        #[arg(long, default_value_t = 0)]
        pane: u32,

        /// Detect prompts but never send a response
        #[arg(long)]
        no_auto: bool,
    },

    /// List tmux sessions and their panes
    Sessions,

    /// Show learned response patterns
    Patterns {
        /// Only show signatures containing this text
        #[arg(long)]
        filter: Option<String>,

        /// Maximum number of patterns to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch {
            session,
            window,
            pane,
            no_auto,
        } => commands::watch::run(config, &session, window, pane, no_auto),
        Commands::Sessions => commands::sessions::run(&config),
        Commands::Patterns { filter, limit } => {
            commands::patterns::run(&config, filter.as_deref(), limit)
        }
    }
}
