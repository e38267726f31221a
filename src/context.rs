//! # Run and Worker Context
//!
//! A [`RunContext`] is created once per run and describes the run as a
//! whole: its configuration, its directories and the total number of
//! projects. Every pool worker turns its own clone of it into a
//! [`WorkerContext`] the first time it executes a task, adding the worker's
//! log streams and a scratch [`Statistics`]. Worker contexts are never
//! shared between workers.

use std::fs::{self, File};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::Result;
use crate::project::Project;
use crate::statistics::Statistics;

/// Working directories of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDirs {
    /// Fetched sources.
    pub source: PathBuf,
    /// Intermediate build trees.
    pub build: PathBuf,
    /// Build results.
    pub target: PathBuf,
}

impl BuildDirs {
    pub fn new(
        source: impl Into<PathBuf>,
        build: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            build: build.into(),
            target: target.into(),
        }
    }

    /// All directories rooted under `root`, mostly for tests.
    pub fn under(root: &Path) -> Self {
        Self::new(root.join("source"), root.join("build"), root.join("target"))
    }

    /// Create every directory that does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.source, &self.build, &self.target] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Run-wide state copied into every worker.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: RunConfig,
    pub dirs: BuildDirs,
    pub projects_count: usize,
}

impl RunContext {
    pub fn new(config: RunConfig, dirs: BuildDirs, projects_count: usize) -> Self {
        Self {
            config,
            dirs,
            projects_count,
        }
    }
}

/// A line-oriented log stream that knows the run's project count.
pub struct ProjectLog {
    sink: Box<dyn Write + Send>,
    total: usize,
}

impl ProjectLog {
    pub fn new(sink: Box<dyn Write + Send>, total: usize) -> Self {
        Self { sink, total }
    }

    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path, total: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::options().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(LineWriter::new(file)), total))
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Write `[index/total] key: message`.
    pub fn project(&mut self, project: &Project, message: &str) -> io::Result<()> {
        writeln!(
            self.sink,
            "[{}/{}] {}: {}",
            project.index, self.total, project.key, message
        )
    }

    /// Write a raw line, e.g. captured tool output.
    pub fn line(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.sink, "{}", message)
    }
}

/// Per-worker state installed by the pool's bootstrap.
pub struct WorkerContext {
    worker: usize,
    run: RunContext,
    pub out: ProjectLog,
    pub err: ProjectLog,
    scratch: Statistics,
}

impl WorkerContext {
    /// Open the worker's log streams.
    ///
    /// With a configured log directory the streams are
    /// `worker_<n>.out.log` and `worker_<n>.err.log`; otherwise they are
    /// the process's stdout and stderr.
    pub fn open(worker: usize, run: RunContext) -> Result<Self> {
        let total = run.projects_count;
        let (out, err) = match &run.config.output.log_dir {
            Some(dir) => (
                ProjectLog::open(&dir.join(format!("worker_{}.out.log", worker)), total)?,
                ProjectLog::open(&dir.join(format!("worker_{}.err.log", worker)), total)?,
            ),
            None => (
                ProjectLog::new(Box::new(io::stdout()), total),
                ProjectLog::new(Box::new(io::stderr()), total),
            ),
        };
        Ok(Self {
            worker,
            run,
            out,
            err,
            scratch: Statistics::new(),
        })
    }

    /// Index of the pool worker owning this context.
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn config(&self) -> &RunConfig {
        &self.run.config
    }

    pub fn dirs(&self) -> &BuildDirs {
        &self.run.dirs
    }

    /// Outcomes of the projects this worker built so far.
    pub fn scratch(&self) -> &Statistics {
        &self.scratch
    }

    /// Fold a built project into the worker's scratch statistics and log
    /// its outcome with the worker's running tally.
    pub fn record(&mut self, project: &Project) -> io::Result<()> {
        self.scratch.update(&project.spec, &project.key);
        let message = format!(
            "{} (worker {}: {} ok, {} failed)",
            crate::project::status(&project.spec)
                .map(|status| status.as_str())
                .unwrap_or("unknown"),
            self.worker,
            self.scratch.succeeded(),
            self.scratch.failed()
        );
        self.out.project(project, &message)
    }
}
