//! # Code Builder Library
//!
//! This library batch-processes large sets of independently sourced software
//! repositories: it fetches every repository, detects and runs its build
//! system, records success or failure plus dependency metadata into the
//! repository's spec, and produces run statistics and JSON artifacts for an
//! incremental rebuild pass. It is used by the `code-builder` command-line
//! tool but the pipeline can be driven with any fetch and build
//! collaborators.
//!
//! ## Quick Example
//!
//! ```
//! use code_builder::statistics::Statistics;
//! use serde_json::json;
//!
//! let mut stats = Statistics::new();
//! stats.update(&json!({ "status": "success" }), "A");
//! stats.update(
//!     &json!({ "status": "failure", "build": { "error": "missing toolchain" } }),
//!     "B",
//! );
//!
//! assert_eq!(stats.total(), 2);
//! assert_eq!(stats.error_histogram()["missing toolchain"], 1);
//! ```
//!
//! ## Core Concepts
//!
//! - **Worker pool (`pool`)**: A fixed-size thread pool. Every worker lazily
//!   sets up its own context (log streams, scratch statistics) the first
//!   time it runs a task.
//! - **Task futures (`future`)**: Cloneable handles on a task's terminal
//!   outcome, plus `when_all`, which fires a callback once a set of futures
//!   completed.
//! - **Pipeline (`pipeline`)**: `schedule` submits one task per argument and
//!   `chain` attaches a dependent stage to a future without blocking.
//! - **Statistics (`statistics`)**: Folds final specs into tallies, an error
//!   histogram, a dependency graph and the rebuild set.
//! - **Collaborators (`fetcher`, `recognizer`)**: The traits the pipeline
//!   calls to fetch and build a project, with git/local fetchers and a build
//!   system recognizer as defaults.
//!
//! ## Execution Flow
//!
//! The entry point is [`orchestrator::build_projects`]:
//!
//! 1.  **Setup**: Create the working directories, resolve one fetch adapter
//!     per repository database and start the worker pool.
//! 2.  **Fetch**: Schedule a fetch task for every repository of a database.
//! 3.  **Build**: Chain a build task onto every fetch; failed fetches skip
//!     their build.
//! 4.  **Collect**: Wait for each project in submission order and write its
//!     final spec back into the repository database.
//! 5.  **Report**: Print the summary and persist the artifacts.

pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod fetcher;
pub mod future;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod project;
pub mod recognizer;
pub mod statistics;
