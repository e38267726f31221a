//! # CLI Command Implementations
//!
//! Each subcommand of the `code-builder` command-line tool lives in its own
//! file and contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args`, performs the
//!   command's logic by calling into the `code_builder` library, and reports
//!   failures through `anyhow`.

pub mod build;
