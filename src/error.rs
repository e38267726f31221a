//! # Error Handling
//!
//! This module defines the run-level error type for `code-builder`. It uses
//! `thiserror` to describe every failure that can abort a run or that a
//! collaborator can report for a single project.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum covering configuration problems, unknown
//!   repository databases, fetch and build collaborator failures, worker pool
//!   construction and the I/O and serialization errors raised while writing
//!   artifacts.
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.
//!
//! Project-level failures never abort a run. When a collaborator returns an
//! `Error`, the orchestrator converts it into the terminal state of the
//! project's future (see [`crate::future::TaskError`]) and records
//! [`Error::failure_reason`] in the project's spec.

use thiserror::Error;

/// Main error type for code-builder operations
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration file could not be read or holds an invalid value.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// No fetch adapter is registered for a repository database.
    #[error("Unknown repository database: {database}")]
    UnknownDatabase { database: String },

    /// A repository spec is missing a field the collaborator needs.
    #[error("Invalid spec for {key}: {message}")]
    InvalidSpec { key: String, message: String },

    /// Fetching a repository's source failed.
    #[error("Fetch error for {key}: {reason}")]
    Fetch { key: String, reason: String },

    /// An external command (git, cmake, make, ...) failed for a repository.
    #[error("Command failed for {key}: {command} - {stderr}")]
    Command {
        key: String,
        command: String,
        stderr: String,
    },

    /// Building a repository failed outside the normal recorded outcomes.
    #[error("Build error for {key}: {reason}")]
    Build { key: String, reason: String },

    /// The worker pool could not be created.
    #[error("Worker pool error: {message}")]
    Pool { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An INI parsing error, wrapped from `ini::Error`.
    #[error("INI parsing error: {0}")]
    Ini(#[from] ini::Error),
}

impl Error {
    /// The reason recorded in a project's spec and in the error histogram.
    ///
    /// Collaborator errors carry a short reason of their own; any other
    /// error falls back to its display text.
    pub fn failure_reason(&self) -> String {
        match self {
            Error::Fetch { reason, .. } | Error::Build { reason, .. } => reason.clone(),
            Error::Command { command, .. } => format!("{} failed", command),
            other => other.to_string(),
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let error = Error::Config {
            message: "threads must be a number".to_string(),
            hint: None,
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration error"));
        assert!(display.contains("threads must be a number"));
        assert!(!display.contains("hint:"));
    }

    #[test]
    fn test_error_display_config_with_hint() {
        let error = Error::Config {
            message: "threads must be a number".to_string(),
            hint: Some("Use e.g. 'threads = 4' in [clone]".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("hint:"));
        assert!(display.contains("[clone]"));
    }

    #[test]
    fn test_error_display_unknown_database() {
        let error = Error::UnknownDatabase {
            database: "svn.example.org".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unknown repository database: svn.example.org"
        );
    }

    #[test]
    fn test_failure_reason_uses_collaborator_reason() {
        let error = Error::Build {
            key: "B".to_string(),
            reason: "missing toolchain".to_string(),
        };
        assert_eq!(error.failure_reason(), "missing toolchain");

        let error = Error::Fetch {
            key: "A".to_string(),
            reason: "repository not found".to_string(),
        };
        assert_eq!(error.failure_reason(), "repository not found");
    }

    #[test]
    fn test_failure_reason_for_command() {
        let error = Error::Command {
            key: "A".to_string(),
            command: "git clone".to_string(),
            stderr: "fatal: could not read Username".to_string(),
        };
        assert_eq!(error.failure_reason(), "git clone failed");
        assert!(error.to_string().contains("could not read Username"));
    }

    #[test]
    fn test_failure_reason_falls_back_to_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        assert!(error.failure_reason().contains("I/O error"));
        assert!(error.failure_reason().contains("File not found"));
    }

    #[test]
    fn test_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{unclosed").unwrap_err();
        let error: Error = json_error.into();
        assert!(error.to_string().contains("JSON error"));
    }
}
