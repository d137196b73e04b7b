//! Clap derive structures for the `oolive` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// oolive -- card-reader station tooling for live orienteering results
#[derive(Debug, Parser)]
#[command(
    name = "oolive",
    version,
    about = "Card-reader station tooling for live orienteering results",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (default: platform config dir)
    #[arg(long, short = 'c', env = "OOLIVE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a recorded card log against the results server
    Replay(ReplayArgs),

    /// List serial ports that look like card readers
    Ports,

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Card log to replay (one JSON record per line)
    #[arg(long, short = 'f')]
    pub file: PathBuf,

    /// Seconds to wait for the server connection before giving up
    #[arg(long, default_value_t = 30)]
    pub connect_timeout: u64,

    /// Seconds to wait for each server reply (default: wait until the
    /// reply arrives or the connection drops)
    #[arg(long)]
    pub reply_timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration (event key masked)
    Show,
    /// Print the configuration file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
