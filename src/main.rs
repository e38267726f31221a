//! # Code Builder CLI
//!
//! This is the binary entry point for the `code-builder` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Setting up logging.
//! - Executing the appropriate command and turning run errors into a
//!   non-zero exit code.
//!
//! The pipeline itself lives in the `code_builder` library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
