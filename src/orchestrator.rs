//! # Orchestrator
//!
//! [`build_projects`] drives a whole run. For every repository database it
//! schedules one fetch task per repository, chains a build task onto every
//! fetch and then waits for the builds in submission order, writing each
//! final spec back into the database and folding it into the run's
//! [`Statistics`]. Project failures never stop the run; they end up in the
//! spec and in the artifacts.
//!
//! After the last group the summary is printed and the artifacts are
//! written to the artifacts directory:
//!
//! | File | Content |
//! |------|---------|
//! | `rebuild.json` | keys worth rebuilding in an incremental run |
//! | `errors.json` | stage and reason of every failure |
//! | `error_stats.json` | failure reason histogram |
//! | `dependencies.json` | dependency graph, read back by the next run |
//! | `summary_<ts>_<count>.txt` | the printed summary |
//! | `build_details_<ts>_<count>.json` | the final repository database |

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use log::{debug, info, warn};
use serde_json::Value;

use crate::config::RunConfig;
use crate::context::{BuildDirs, RunContext};
use crate::defaults::{DEPENDENCIES_FILE, ERRORS_FILE, ERROR_STATS_FILE, REBUILD_FILE};
use crate::error::Result;
use crate::fetcher::{Fetcher, FetcherRegistry};
use crate::future::{when_all, Outcome, TaskError, TaskFuture};
use crate::pipeline::{chain, schedule};
use crate::pool::WorkerPool;
use crate::project::{self, Project, RepositoryDatabase};
use crate::recognizer::ProjectBuilder;
use crate::statistics::Statistics;

/// Format of the timestamp in the names of the summary and details files.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Everything a run needs besides the repositories themselves.
pub struct BuildRun<'a> {
    pub dirs: BuildDirs,
    pub config: RunConfig,
    pub fetchers: &'a dyn FetcherRegistry,
    pub builder: Arc<dyn ProjectBuilder>,
}

/// Fetch and build every repository, returning the database with every
/// entry replaced by its final spec.
pub fn build_projects(
    run: &BuildRun<'_>,
    mut repositories: RepositoryDatabase,
    summary: &mut dyn Write,
) -> Result<RepositoryDatabase> {
    let started = Instant::now();
    let artifacts = run.config.output.artifacts_dir.as_path();
    run.dirs.ensure()?;
    fs::create_dir_all(artifacts)?;

    let projects_count = project::count_projects(&repositories);
    let mut adapters: BTreeMap<String, Arc<dyn Fetcher>> = BTreeMap::new();
    for database in repositories.keys() {
        let adapter = run.fetchers.adapter(database, &run.dirs.source)?;
        adapters.insert(database.clone(), adapter);
    }

    let workers = run.config.worker_count();
    info!(
        "Building {} projects from {} databases with {} workers",
        projects_count,
        repositories.len(),
        workers
    );
    let pool = WorkerPool::new(
        workers,
        RunContext::new(run.config.clone(), run.dirs.clone(), projects_count),
    )?;

    let mut stats = Statistics::new().with_previous_dependencies(previous_dependencies(
        &artifacts.join(DEPENDENCIES_FILE),
    ));

    let mut next_index = 1;
    for (database, entries) in repositories.iter_mut() {
        let adapter = Arc::clone(&adapters[database]);
        let projects: Vec<Project> = entries
            .iter()
            .enumerate()
            .map(|(offset, (key, spec))| {
                let mut spec = spec.clone();
                project::clear_markers(&mut spec);
                Project::new(next_index + offset, key.clone(), spec)
            })
            .collect();
        next_index += projects.len();
        info!("{}: {} projects", database, projects.len());

        let fetcher = Arc::clone(&adapter);
        let fetches = schedule(
            &pool,
            move |project: Project, ctx| {
                fetcher.fetch(project, ctx).map_err(|e| TaskError::Fetch {
                    reason: e.failure_reason(),
                })
            },
            projects.iter().cloned(),
        );
        let fetched = when_all(&pool, fetches.clone(), move || adapter.finish());
        let builds: Vec<TaskFuture<Project>> = fetches
            .iter()
            .cloned()
            .map(|fetch| {
                let builder = Arc::clone(&run.builder);
                chain(&pool, fetch, move |project, ctx| {
                    builder
                        .recognize_and_build(project, ctx)
                        .map_err(|e| TaskError::Build {
                            reason: e.failure_reason(),
                        })
                })
            })
            .collect();

        for ((project, fetch), build) in projects.into_iter().zip(fetches).zip(builds) {
            let outcome = build.wait();
            let spec = settle(project.spec, fetch.peek(), outcome);
            debug!(
                "[{}/{}] {}: {}",
                project.index,
                projects_count,
                project.key,
                project::status(&spec).map_or("unknown", |status| status.as_str())
            );
            stats.update_in(database, &spec, &project.key);
            entries.insert(project.key, spec);
        }
        fetched.wait();
    }

    info!(
        "Finished {} projects in {:.1?}",
        projects_count,
        started.elapsed()
    );

    let mut report = Vec::new();
    stats.print_summary(&mut report)?;
    summary.write_all(&report)?;
    summary.flush()?;

    stats.persist_rebuild_set(&artifacts.join(REBUILD_FILE))?;
    stats.persist_errors(&artifacts.join(ERRORS_FILE))?;
    stats.persist_error_histogram(&artifacts.join(ERROR_STATS_FILE))?;
    stats.persist_dependency_graph(&artifacts.join(DEPENDENCIES_FILE))?;

    let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    fs::write(
        artifacts.join(format!("summary_{}_{}.txt", stamp, projects_count)),
        &report,
    )?;
    let details = artifacts.join(format!("build_details_{}_{}.json", stamp, projects_count));
    let mut writer = BufWriter::new(File::create(&details)?);
    serde_json::to_writer_pretty(&mut writer, &repositories)?;
    writeln!(writer)?;
    writer.flush()?;
    info!("Build details written to {}", details.display());

    Ok(repositories)
}

/// Dependency graph of the previous run, empty when there is none.
fn previous_dependencies(path: &Path) -> crate::statistics::DependencyGraph {
    if !path.is_file() {
        return Default::default();
    }
    match Statistics::load_previous_dependencies(path) {
        Ok(graph) => {
            debug!("Loaded previous dependency graph from {}", path.display());
            graph
        }
        Err(e) => {
            warn!("Ignoring previous dependency graph {}: {}", path.display(), e);
            Default::default()
        }
    }
}

/// The final spec of a project from the outcomes of its two stages.
///
/// A build that never ran is recorded as a fetch failure, including a
/// build skipped because its fetch panicked. A failed or panicked build
/// keeps the fetch markers of its project when the fetch succeeded.
fn settle(input: Value, fetch: Option<Outcome<Project>>, build: Outcome<Project>) -> Value {
    match build {
        Outcome::Succeeded(built) => {
            let mut spec = built.spec;
            project::finalize(&mut spec);
            spec
        }
        Outcome::Failed(TaskError::Skipped(cause)) => {
            let mut spec = input;
            project::mark_fetch_failed(&mut spec, cause.reason());
            spec
        }
        Outcome::Failed(error) => {
            let mut spec = match fetch {
                Some(Outcome::Succeeded(fetched)) => fetched.spec,
                _ => input,
            };
            project::mark_build_failed(&mut spec, error.reason());
            spec
        }
        Outcome::Cancelled => match fetch {
            Some(Outcome::Cancelled) => {
                let mut spec = input;
                project::mark_fetch_failed(&mut spec, project::CANCELLED_REASON);
                spec
            }
            Some(Outcome::Succeeded(fetched)) => {
                let mut spec = fetched.spec;
                project::mark_cancelled(&mut spec);
                spec
            }
            _ => {
                let mut spec = input;
                project::mark_cancelled(&mut spec);
                spec
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fetched(spec: Value) -> Option<Outcome<Project>> {
        Some(Outcome::Succeeded(Project::new(1, "k", spec)))
    }

    #[test]
    fn test_settle_success_finalizes() {
        let built = Project::new(1, "k", json!({ "build": { "status": "success" } }));
        let spec = settle(json!({}), None, Outcome::Succeeded(built));
        assert_eq!(spec["status"], "success");
    }

    #[test]
    fn test_settle_skipped_build_is_fetch_failure() {
        let error = TaskError::Skipped(Box::new(TaskError::Fetch {
            reason: "repository not found".to_string(),
        }));
        let spec = settle(json!({ "url": "u" }), None, Outcome::Failed(error));
        assert_eq!(spec["status"], "failure");
        assert_eq!(spec["fetch"]["status"], "failure");
        assert_eq!(spec["fetch"]["error"], "repository not found");
        assert_eq!(spec["build"]["status"], project::NOT_ATTEMPTED);
        assert_eq!(spec["url"], "u");
    }

    #[test]
    fn test_settle_build_failure_keeps_fetch_markers() {
        let error = TaskError::Build {
            reason: "Invalid spec for k: no fetched source directory".to_string(),
        };
        let spec = settle(
            json!({}),
            fetched(json!({ "fetch": { "status": "success", "dir": "/src/k" } })),
            Outcome::Failed(error),
        );
        assert_eq!(spec["fetch"]["dir"], "/src/k");
        assert_eq!(spec["build"]["status"], "failure");
        assert_eq!(spec["status"], "failure");
    }

    #[test]
    fn test_settle_cancelled() {
        let spec = settle(json!("raw"), None, Outcome::Cancelled);
        assert_eq!(spec["spec"], "raw");
        assert_eq!(spec["build"]["status"], project::CANCELLED);
        assert_eq!(spec["status"], "failure");
    }

    #[test]
    fn test_settle_cancelled_fetch_is_fetch_failure() {
        let spec = settle(json!({}), Some(Outcome::Cancelled), Outcome::Cancelled);
        assert_eq!(spec["fetch"]["status"], "failure");
        assert_eq!(spec["fetch"]["error"], project::CANCELLED_REASON);
        assert_eq!(spec["build"]["status"], project::NOT_ATTEMPTED);
        assert_eq!(project::failure(&spec).0, project::Stage::Fetch);
    }

    #[test]
    fn test_settle_cancelled_build_keeps_fetch_markers() {
        let spec = settle(
            json!({}),
            fetched(json!({ "fetch": { "status": "success", "dir": "/src/k" } })),
            Outcome::Cancelled,
        );
        assert_eq!(spec["fetch"]["dir"], "/src/k");
        assert_eq!(spec["build"]["status"], project::CANCELLED);
        assert_eq!(project::failure(&spec).0, project::Stage::Build);
    }

    #[test]
    fn test_previous_dependencies_missing_or_corrupt() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(DEPENDENCIES_FILE);
        assert!(previous_dependencies(&path).is_empty());
        fs::write(&path, "not json").unwrap();
        assert!(previous_dependencies(&path).is_empty());
        fs::write(&path, r#"{ "app": ["fmt"] }"#).unwrap();
        assert_eq!(previous_dependencies(&path)["app"].len(), 1);
    }
}
