//! Shared test utilities for integration and E2E tests.
//!
//! Provides scripted fetch and build collaborators that never touch the
//! network or run build tools, plus helpers to set up a run inside a
//! temporary directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//!
//! #[test]
//! fn test_example() {
//!     let temp = TempDir::new().unwrap();
//!     let registry = MockRegistry::default();
//!     let builder = Arc::new(MockBuilder::default());
//!     let result = run_pipeline(&temp, RunConfig::serial(), &registry, builder, db);
//! }
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use code_builder::config::RunConfig;
use code_builder::context::{BuildDirs, WorkerContext};
use code_builder::error::{Error, Result};
use code_builder::fetcher::{Fetcher, FetcherRegistry};
use code_builder::orchestrator::{build_projects, BuildRun};
use code_builder::project::{self, Project, RepositoryDatabase};
use code_builder::recognizer::ProjectBuilder;
use serde_json::Value;

pub use tempfile::TempDir;

/// Fetcher that fails or panics for fixed sets of keys.
pub struct MockFetcher {
    failing: BTreeSet<String>,
    panicking: BTreeSet<String>,
    finished: Arc<AtomicUsize>,
}

impl Fetcher for MockFetcher {
    fn fetch(&self, mut project: Project, _ctx: &mut WorkerContext) -> Result<Project> {
        if self.panicking.contains(&project.key) {
            panic!("fetch exploded for {}", project.key);
        }
        if self.failing.contains(&project.key) {
            return Err(Error::Fetch {
                key: project.key.clone(),
                reason: "repository not found".to_string(),
            });
        }
        let dir = format!("/sources/{}", project.key);
        project::mark_fetched(&mut project.spec, &dir);
        Ok(project)
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry handing out [`MockFetcher`]s for every database except
/// `unknown`.
#[derive(Default)]
pub struct MockRegistry {
    pub failing: BTreeSet<String>,
    pub panicking: BTreeSet<String>,
    pub finished: Arc<AtomicUsize>,
}

impl MockRegistry {
    pub fn failing(keys: &[&str]) -> Self {
        Self {
            failing: keys.iter().map(|key| key.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn panicking(keys: &[&str]) -> Self {
        Self {
            panicking: keys.iter().map(|key| key.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl FetcherRegistry for MockRegistry {
    fn adapter(&self, database: &str, _source_dir: &Path) -> Result<Arc<dyn Fetcher>> {
        if database == "unknown" {
            return Err(Error::UnknownDatabase {
                database: database.to_string(),
            });
        }
        Ok(Arc::new(MockFetcher {
            failing: self.failing.clone(),
            panicking: self.panicking.clone(),
            finished: Arc::clone(&self.finished),
        }))
    }
}

/// Builder with scripted failure reasons, remembering every call.
#[derive(Default)]
pub struct MockBuilder {
    pub failures: BTreeMap<String, String>,
    pub calls: Mutex<Vec<(usize, String)>>,
}

impl MockBuilder {
    pub fn failing(failures: &[(&str, &str)]) -> Self {
        Self {
            failures: failures
                .iter()
                .map(|(key, reason)| (key.to_string(), reason.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn called_keys(&self) -> BTreeSet<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn called_indices(&self) -> BTreeSet<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(index, _)| *index)
            .collect()
    }
}

impl ProjectBuilder for MockBuilder {
    fn recognize_and_build(&self, mut project: Project, ctx: &mut WorkerContext) -> Result<Project> {
        self.calls
            .lock()
            .unwrap()
            .push((project.index, project.key.clone()));
        let declared = project::declared_dependencies(&project.spec);
        project::set_dependencies(&mut project.spec, &declared);
        match self.failures.get(&project.key) {
            Some(reason) => project::mark_build_failed(&mut project.spec, reason),
            None => project::mark_built(&mut project.spec, "mock"),
        }
        ctx.record(&project)?;
        Ok(project)
    }
}

/// Configuration writing logs and artifacts under `temp`.
pub fn config_in(temp: &TempDir, workers: Option<usize>) -> RunConfig {
    let mut config = match workers {
        Some(threads) => {
            let mut config = RunConfig::default();
            config.clone.multithreaded = true;
            config.clone.threads = threads;
            config
        }
        None => RunConfig::serial(),
    };
    config.output.log_dir = Some(temp.path().join("logs"));
    config.output.artifacts_dir = temp.path().join("artifacts");
    config
}

/// Run the pipeline, returning the final database and the printed summary.
pub fn run_pipeline(
    temp: &TempDir,
    config: RunConfig,
    registry: &MockRegistry,
    builder: Arc<MockBuilder>,
    repositories: RepositoryDatabase,
) -> Result<(RepositoryDatabase, String)> {
    let run = BuildRun {
        dirs: BuildDirs::under(temp.path()),
        config,
        fetchers: registry,
        builder,
    };
    let mut summary = Vec::new();
    let result = build_projects(&run, repositories, &mut summary)?;
    Ok((result, String::from_utf8_lossy(&summary).into_owned()))
}

/// Build a repository database from JSON.
pub fn database(value: Value) -> RepositoryDatabase {
    serde_json::from_value(value).expect("valid repository database")
}

/// Read a JSON artifact written by a run.
pub fn artifact(temp: &TempDir, name: &str) -> Value {
    let content = std::fs::read_to_string(temp.path().join("artifacts").join(name))
        .unwrap_or_else(|e| panic!("missing artifact {}: {}", name, e));
    serde_json::from_str(&content).expect("artifact is JSON")
}
