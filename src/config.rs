//! # Run Configuration
//!
//! Configuration for a build run is read from INI files. The application
//! file (`build.cfg` by default) is applied first and the user file
//! (`user.cfg`) second, so user settings override application settings key
//! by key.
//!
//! ## Format
//!
//! ```ini
//! [clone]
//! multithreaded = true
//! threads = 8
//!
//! [build]
//! force_update = false
//! jobs = 4
//!
//! [output]
//! log_dir = logs
//! artifacts_dir = buildlogs
//! ```
//!
//! Every key is optional. A missing `threads` falls back to the available
//! parallelism of the host, and a missing `log_dir` sends worker logs to
//! stdout and stderr.

use std::path::{Path, PathBuf};

use ini::Ini;
use log::debug;

use crate::defaults;
use crate::error::{Error, Result};

/// Settings for the fetch stage and the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSettings {
    /// When false the run uses exactly one worker.
    pub multithreaded: bool,
    /// Worker count in multithreaded mode.
    pub threads: usize,
}

/// Settings handed to the build collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Re-fetch sources even when a checkout already exists.
    pub force_update: bool,
    /// Parallel jobs passed to build tools.
    pub jobs: usize,
}

/// Where logs and run artifacts are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Directory for per-worker logs. `None` logs to stdout/stderr.
    pub log_dir: Option<PathBuf>,
    /// Directory for statistics artifacts and run snapshots.
    pub artifacts_dir: PathBuf,
}

/// Complete configuration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub clone: CloneSettings,
    pub build: BuildSettings,
    pub output: OutputSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            clone: CloneSettings {
                multithreaded: true,
                threads: defaults::default_threads(),
            },
            build: BuildSettings {
                force_update: false,
                jobs: 1,
            },
            output: OutputSettings {
                log_dir: None,
                artifacts_dir: PathBuf::from(defaults::ARTIFACTS_DIR),
            },
        }
    }
}

impl RunConfig {
    /// A configuration that runs everything on a single worker.
    pub fn serial() -> Self {
        let mut config = Self::default();
        config.clone.multithreaded = false;
        config
    }

    /// Number of pool workers for this run.
    ///
    /// Non-multithreaded mode always yields exactly one worker, which makes
    /// the run fully serialized.
    pub fn worker_count(&self) -> usize {
        if self.clone.multithreaded {
            self.clone.threads.max(1)
        } else {
            1
        }
    }

    /// Load the application file, then the user file on top of it.
    ///
    /// A `None` path or a path that does not exist leaves the corresponding
    /// layer out.
    pub fn load(app_config: Option<&Path>, user_config: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        for path in [app_config, user_config].into_iter().flatten() {
            if !path.exists() {
                debug!("Configuration file {} not found, skipping", path.display());
                continue;
            }
            debug!("Loading configuration from {}", path.display());
            let ini = Ini::load_from_file(path)?;
            config.apply(&ini)?;
        }
        Ok(config)
    }

    /// Parse a configuration from INI text on top of the defaults.
    pub fn from_ini_str(content: &str) -> Result<Self> {
        let ini = Ini::load_from_str(content).map_err(|e| Error::Config {
            message: e.to_string(),
            hint: None,
        })?;
        let mut config = Self::default();
        config.apply(&ini)?;
        Ok(config)
    }

    /// Override fields with every key present in `ini`.
    fn apply(&mut self, ini: &Ini) -> Result<()> {
        if let Some(value) = ini.get_from(Some("clone"), "multithreaded") {
            self.clone.multithreaded = parse_bool("clone", "multithreaded", value)?;
        }
        if let Some(value) = ini.get_from(Some("clone"), "threads") {
            self.clone.threads = parse_count("clone", "threads", value)?;
        }
        if let Some(value) = ini.get_from(Some("build"), "force_update") {
            self.build.force_update = parse_bool("build", "force_update", value)?;
        }
        if let Some(value) = ini.get_from(Some("build"), "jobs") {
            self.build.jobs = parse_count("build", "jobs", value)?;
        }
        if let Some(value) = ini.get_from(Some("output"), "log_dir") {
            let value = value.trim();
            self.output.log_dir = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = ini.get_from(Some("output"), "artifacts_dir") {
            self.output.artifacts_dir = PathBuf::from(value.trim());
        }
        Ok(())
    }
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(Error::Config {
            message: format!("[{}] {} expects a boolean, got '{}'", section, key, other),
            hint: Some("Use true or false".to_string()),
        }),
    }
}

fn parse_count(section: &str, key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(Error::Config {
            message: format!(
                "[{}] {} expects a positive number, got '{}'",
                section,
                key,
                value.trim()
            ),
            hint: None,
        }),
    }
}
