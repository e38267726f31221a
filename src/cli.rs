//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Code Builder - Fetch and build large sets of source repositories
#[derive(Parser, Debug)]
#[command(name = "code-builder")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and build every repository of a repository database
    Build(commands::build::BuildArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        let level = match &self.command {
            Commands::Build(args) if args.verbose => "debug",
            _ => self.log_level.as_str(),
        };
        init_logging(level);

        match self.command {
            Commands::Build(args) => commands::build::execute(args),
        }
    }
}

/// `RUST_LOG`, when set, wins over `level`.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // a logger installed by an embedding process stays in place
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .try_init();
}
