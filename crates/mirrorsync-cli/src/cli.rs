//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// mirrorsync - mirror meetings from one calendar into another
#[derive(Debug, Parser)]
#[command(name = "mirrorsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "MIRRORSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the webhook server until SIGINT/SIGTERM
    #[cfg(feature = "google")]
    Serve {
        /// Override the listen address from the config file
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Keep sync state in memory only (nothing is written to disk)
        #[arg(long)]
        ephemeral: bool,
    },

    /// Register a push notification channel for a pair's source calendar
    #[cfg(feature = "google")]
    Watch {
        /// Pair name
        pair: String,

        /// Requested channel lifetime in seconds (the calendar may shorten it)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Inspect or reset stored sync state
    State(StateArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `state <pair>` shows, `state reset <pair>` clears the resume token.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct StateArgs {
    /// Pair name
    pub pair: Option<String>,

    #[command(subcommand)]
    pub action: Option<StateAction>,
}

/// State actions.
#[derive(Debug, Subcommand)]
pub enum StateAction {
    /// Show the stored resume token, last notification time and mapping count
    Show {
        /// Pair name
        pair: String,
    },

    /// Clear the resume token so the next notification triggers a full resync
    Reset {
        /// Pair name
        pair: String,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
