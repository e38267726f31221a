//! # Run Statistics
//!
//! [`Statistics`] folds the final spec of every project into run-wide
//! tallies: success and failure counts, the reason and stage of every
//! failure, a histogram of failure reasons, the detected build systems and
//! the dependency graph declared by the projects.
//!
//! From the dependency graph it derives the rebuild set: the projects worth
//! building again in an incremental run because their recorded dependencies
//! changed since the previous run or because something they depend on
//! failed in this one.
//!
//! The orchestrator owns the run's `Statistics` and calls
//! [`Statistics::update_in`] exactly once per project. Every collection is an
//! ordered map, so the tallies and the persisted JSON do not depend on the
//! order projects were folded in.
//!
//! Repository keys are only unique within their database, so failures are
//! recorded under `database/key`. The dependency graph uses bare keys, the
//! names projects declare their dependencies by.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::project::{self, Status};

/// Number of failure reasons listed by [`Statistics::print_summary`].
const TOP_REASONS: usize = 10;

/// Key → sorted dependency keys.
pub type DependencyGraph = BTreeMap<String, BTreeSet<String>>;

/// Where and why a project failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    total: usize,
    succeeded: usize,
    failed: usize,
    errors: BTreeMap<String, FailureRecord>,
    error_histogram: BTreeMap<String, usize>,
    build_systems: BTreeMap<String, usize>,
    dependencies: DependencyGraph,
    previous_dependencies: DependencyGraph,
    folded: BTreeSet<String>,
    failed_keys: BTreeSet<String>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the dependency graph of the previous run, used to spot changed
    /// dependencies in [`Statistics::compute_rebuild_set`].
    pub fn with_previous_dependencies(mut self, previous: DependencyGraph) -> Self {
        self.previous_dependencies = previous;
        self
    }

    /// Read a dependency graph written by
    /// [`Statistics::persist_dependency_graph`].
    pub fn load_previous_dependencies(path: &Path) -> Result<DependencyGraph> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Fold one project's final spec, recording a failure under the bare
    /// `key`.
    ///
    /// Call once per key: folding a key twice counts it twice.
    pub fn update(&mut self, spec: &Value, key: &str) {
        self.fold(spec, key, key.to_string());
    }

    /// Fold one project of `database`, recording a failure under
    /// `database/key`.
    pub fn update_in(&mut self, database: &str, spec: &Value, key: &str) {
        self.fold(spec, key, format!("{}/{}", database, key));
    }

    fn fold(&mut self, spec: &Value, key: &str, error_key: String) {
        self.total += 1;
        self.folded.insert(key.to_string());
        match project::status(spec) {
            Some(Status::Success) => self.succeeded += 1,
            _ => {
                self.failed += 1;
                self.failed_keys.insert(key.to_string());
                let (stage, reason) = project::failure(spec);
                *self.error_histogram.entry(reason.clone()).or_default() += 1;
                self.errors.insert(
                    error_key,
                    FailureRecord {
                        stage: stage.as_str().to_string(),
                        reason,
                    },
                );
            }
        }
        if let Some(system) = project::build_system(spec) {
            *self.build_systems.entry(system.to_string()).or_default() += 1;
        }
        let dependencies = project::dependencies(spec);
        if !dependencies.is_empty() {
            self.dependencies
                .entry(key.to_string())
                .or_default()
                .extend(dependencies);
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn errors(&self) -> &BTreeMap<String, FailureRecord> {
        &self.errors
    }

    pub fn error_histogram(&self) -> &BTreeMap<String, usize> {
        &self.error_histogram
    }

    pub fn build_systems(&self) -> &BTreeMap<String, usize> {
        &self.build_systems
    }

    /// Dependencies recorded by the projects folded in this run.
    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.dependencies
    }

    /// The graph handed to the next run: this run's dependencies, plus the
    /// previous run's entries for keys this run did not fold.
    pub fn persisted_dependency_graph(&self) -> DependencyGraph {
        let mut graph: DependencyGraph = self
            .previous_dependencies
            .iter()
            .filter(|(key, _)| !self.folded.contains(*key))
            .map(|(key, deps)| (key.clone(), deps.clone()))
            .collect();
        graph.extend(
            self.dependencies
                .iter()
                .map(|(key, deps)| (key.clone(), deps.clone())),
        );
        graph
    }

    /// Share of succeeded projects in percent, `0.0` for an empty run.
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / self.total as f64
        }
    }

    /// Failure reasons by descending count, ties broken by reason.
    pub fn top_failure_reasons(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut reasons: Vec<(&str, usize)> = self
            .error_histogram
            .iter()
            .map(|(reason, count)| (reason.as_str(), *count))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        reasons.truncate(limit);
        reasons
    }

    /// Projects to rebuild in an incremental run.
    ///
    /// A project is included when its dependencies differ from those
    /// recorded by the previous run, or when it depends, directly or
    /// through other projects, on a project that failed in this run. A key
    /// the previous run did not record is not a change.
    pub fn compute_rebuild_set(&self) -> BTreeSet<String> {
        let none = BTreeSet::new();
        let mut rebuild: BTreeSet<String> = self
            .folded
            .iter()
            .filter(|key| {
                let current = self.dependencies.get(*key).unwrap_or(&none);
                self.previous_dependencies
                    .get(*key)
                    .is_some_and(|previous| previous != current)
            })
            .cloned()
            .collect();

        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, deps) in &self.dependencies {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(key.as_str());
            }
        }

        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.failed_keys.iter().map(String::as_str).collect();
        while let Some(failed) = queue.pop_front() {
            for &dependent in dependents.get(failed).into_iter().flatten() {
                if visited.insert(dependent) {
                    rebuild.insert(dependent.to_string());
                    queue.push_back(dependent);
                }
            }
        }
        rebuild
    }

    /// Write the rebuild set as a sorted JSON array.
    pub fn persist_rebuild_set(&self, path: &Path) -> Result<()> {
        write_json(path, &self.compute_rebuild_set())
    }

    /// Write the stage and reason of every failed project.
    pub fn persist_errors(&self, path: &Path) -> Result<()> {
        write_json(path, &self.errors)
    }

    /// Write the failure reason histogram.
    pub fn persist_error_histogram(&self, path: &Path) -> Result<()> {
        write_json(path, &self.error_histogram)
    }

    /// Write the dependency graph read back by the next run.
    pub fn persist_dependency_graph(&self, path: &Path) -> Result<()> {
        write_json(path, &self.persisted_dependency_graph())
    }

    /// Human-readable run summary.
    pub fn print_summary(&self, sink: &mut dyn Write) -> io::Result<()> {
        writeln!(sink, "Projects:  {}", self.total)?;
        writeln!(sink, "Succeeded: {}", self.succeeded)?;
        writeln!(sink, "Failed:    {}", self.failed)?;
        writeln!(sink, "Pass rate: {:.2}%", self.pass_rate())?;
        if !self.build_systems.is_empty() {
            writeln!(sink, "Build systems:")?;
            for (system, count) in &self.build_systems {
                writeln!(sink, "  {:>5}  {}", count, system)?;
            }
        }
        let reasons = self.top_failure_reasons(TOP_REASONS);
        if !reasons.is_empty() {
            writeln!(sink, "Top failure reasons:")?;
            for (reason, count) in reasons {
                writeln!(sink, "  {:>5}  {}", count, reason)?;
            }
        }
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn success(deps: &[&str]) -> Value {
        json!({
            "status": "success",
            "build": { "status": "success", "system": "cmake", "dependencies": deps }
        })
    }

    fn build_failure(reason: &str, deps: &[&str]) -> Value {
        json!({
            "status": "failure",
            "build": { "status": "failure", "error": reason, "dependencies": deps }
        })
    }

    #[test]
    fn test_update_counts_and_histogram() {
        let mut stats = Statistics::new();
        stats.update(&success(&[]), "A");
        stats.update(&build_failure("missing toolchain", &[]), "B");

        assert_eq!(stats.total(), 2);
        assert_eq!(stats.succeeded(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(
            stats.error_histogram(),
            &BTreeMap::from([("missing toolchain".to_string(), 1)])
        );
        assert_eq!(stats.errors()["B"].stage, "build");
        assert_eq!(stats.build_systems()["cmake"], 1);
    }

    #[test]
    fn test_update_fetch_failure() {
        let mut stats = Statistics::new();
        let mut spec = json!({});
        project::mark_fetch_failed(&mut spec, "host unreachable");
        stats.update(&spec, "C");
        assert_eq!(
            stats.errors()["C"],
            FailureRecord {
                stage: "fetch".to_string(),
                reason: "host unreachable".to_string()
            }
        );
    }

    #[test]
    fn test_spec_without_status_counts_as_failure() {
        let mut stats = Statistics::new();
        stats.update(&json!({ "url": "x" }), "D");
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.error_histogram()["unknown"], 1);
    }

    #[test]
    fn test_duplicate_key_double_counts() {
        let mut stats = Statistics::new();
        stats.update(&success(&[]), "A");
        stats.update(&success(&[]), "A");
        assert_eq!(stats.total(), 2);
        assert_eq!(stats.succeeded(), 2);
    }

    #[test]
    fn test_pass_rate_and_top_reasons() {
        let mut stats = Statistics::new();
        assert_eq!(stats.pass_rate(), 0.0);
        stats.update(&success(&[]), "a");
        stats.update(&build_failure("zeta", &[]), "b");
        stats.update(&build_failure("alpha", &[]), "c");
        stats.update(&build_failure("zeta", &[]), "d");

        assert_eq!(stats.pass_rate(), 25.0);
        assert_eq!(
            stats.top_failure_reasons(10),
            vec![("zeta", 2), ("alpha", 1)]
        );
        assert_eq!(stats.top_failure_reasons(1), vec![("zeta", 2)]);
    }

    #[test]
    fn test_rebuild_set_includes_transitive_dependents_of_failures() {
        let mut stats = Statistics::new();
        stats.update(&build_failure("broken", &[]), "zlib");
        stats.update(&success(&["zlib"]), "libpng");
        stats.update(&success(&["libpng"]), "imagetool");
        stats.update(&success(&["fmt"]), "logger");
        stats.update(&success(&[]), "fmt");

        let rebuild: Vec<String> = stats.compute_rebuild_set().into_iter().collect();
        assert_eq!(rebuild, vec!["imagetool".to_string(), "libpng".to_string()]);
    }

    #[test]
    fn test_rebuild_set_includes_changed_dependencies() {
        let previous = DependencyGraph::from([
            ("app".to_string(), BTreeSet::from(["fmt".to_string()])),
            ("tool".to_string(), BTreeSet::from(["fmt".to_string()])),
        ]);
        let mut stats = Statistics::new().with_previous_dependencies(previous);
        stats.update(&success(&["fmt", "spdlog"]), "app");
        stats.update(&success(&["fmt"]), "tool");
        stats.update(&success(&["fmt"]), "newcomer");

        let rebuild: Vec<String> = stats.compute_rebuild_set().into_iter().collect();
        assert_eq!(rebuild, vec!["app".to_string()]);
    }

    #[test]
    fn test_persist_dependency_graph_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut stats = Statistics::new();
        stats.update(&success(&["b", "a"]), "x");
        stats.update(&success(&["c"]), "y");

        let path = temp.path().join("dependencies.json");
        stats.persist_dependency_graph(&path).unwrap();
        let first = fs::read(&path).unwrap();
        stats.persist_dependency_graph(&path).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);

        let loaded = Statistics::load_previous_dependencies(&path).unwrap();
        assert_eq!(&loaded, stats.dependency_graph());
    }

    #[test]
    fn test_rebuild_set_includes_removed_dependencies() {
        let previous = DependencyGraph::from([
            ("app".to_string(), BTreeSet::from(["fmt".to_string()])),
            ("tool".to_string(), BTreeSet::from(["fmt".to_string()])),
        ]);
        let mut stats = Statistics::new().with_previous_dependencies(previous);
        stats.update(&success(&[]), "app");
        let mut spec = json!({});
        project::mark_fetch_failed(&mut spec, "host unreachable");
        stats.update(&spec, "tool");
        stats.update(&success(&[]), "newcomer");

        let rebuild: Vec<String> = stats.compute_rebuild_set().into_iter().collect();
        assert_eq!(rebuild, vec!["app".to_string(), "tool".to_string()]);
    }

    #[test]
    fn test_persisted_graph_keeps_entries_of_unfolded_keys() {
        let previous = DependencyGraph::from([
            ("app".to_string(), BTreeSet::from(["fmt".to_string()])),
            ("viewer".to_string(), BTreeSet::from(["png".to_string()])),
        ]);
        let mut stats = Statistics::new().with_previous_dependencies(previous);
        stats.update(&success(&[]), "app");
        stats.update(&success(&["zlib"]), "png");

        let graph = stats.persisted_dependency_graph();
        assert_eq!(
            graph,
            DependencyGraph::from([
                ("png".to_string(), BTreeSet::from(["zlib".to_string()])),
                ("viewer".to_string(), BTreeSet::from(["png".to_string()])),
            ])
        );
        assert!(!stats.dependency_graph().contains_key("viewer"));
    }

    #[test]
    fn test_update_in_qualifies_failures_by_database() {
        let mut stats = Statistics::new();
        stats.update_in("github.org", &build_failure("missing toolchain", &[]), "zlib");
        stats.update_in("local", &build_failure("build command failed", &[]), "zlib");
        stats.update_in("local", &success(&["zlib"]), "png");

        assert_eq!(stats.errors().len(), 2);
        assert_eq!(stats.errors()["github.org/zlib"].reason, "missing toolchain");
        assert_eq!(stats.errors()["local/zlib"].reason, "build command failed");
        assert_eq!(stats.error_histogram().values().sum::<usize>(), 2);
        assert_eq!(
            stats.compute_rebuild_set(),
            BTreeSet::from(["png".to_string()])
        );
    }

    #[test]
    fn test_persist_artifacts() {
        let temp = TempDir::new().unwrap();
        let mut stats = Statistics::new();
        stats.update(&build_failure("missing toolchain", &[]), "B");
        stats.update(&success(&["B"]), "A");

        stats.persist_errors(&temp.path().join("errors.json")).unwrap();
        stats
            .persist_error_histogram(&temp.path().join("error_stats.json"))
            .unwrap();
        stats
            .persist_rebuild_set(&temp.path().join("rebuild.json"))
            .unwrap();

        let errors: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("errors.json")).unwrap())
                .unwrap();
        assert_eq!(errors["B"]["reason"], "missing toolchain");
        let histogram: Value = serde_json::from_str(
            &fs::read_to_string(temp.path().join("error_stats.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(histogram, json!({ "missing toolchain": 1 }));
        let rebuild: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("rebuild.json")).unwrap())
                .unwrap();
        assert_eq!(rebuild, json!(["A"]));
    }

    #[test]
    fn test_print_summary() {
        let mut stats = Statistics::new();
        stats.update(&success(&[]), "A");
        stats.update(&build_failure("missing toolchain", &[]), "B");

        let mut out = Vec::new();
        stats.print_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Projects:  2"));
        assert!(text.contains("Succeeded: 1"));
        assert!(text.contains("Failed:    1"));
        assert!(text.contains("Pass rate: 50.00%"));
        assert!(text.contains("cmake"));
        assert!(text.contains("1  missing toolchain"));
    }

    fn project_entries(
    ) -> impl Strategy<Value = (Vec<(String, Value)>, Vec<(String, Value)>)> {
        let spec = (
            any::<bool>(),
            0..3usize,
            proptest::collection::vec("[a-f]{1,2}", 0..3),
        )
            .prop_map(|(ok, reason, deps)| {
                let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                if ok {
                    success(&deps)
                } else {
                    build_failure(&format!("reason-{}", reason), &deps)
                }
            });
        proptest::collection::btree_map("[a-f]{1,2}", spec, 1..12).prop_flat_map(|entries| {
            let entries: Vec<(String, Value)> = entries.into_iter().collect();
            (Just(entries.clone()), Just(entries).prop_shuffle())
        })
    }

    proptest! {
        /// Property: folding disjoint keys is commutative
        #[test]
        fn fold_order_does_not_matter((ordered, shuffled) in project_entries()) {
            let mut forward = Statistics::new();
            for (key, spec) in &ordered {
                forward.update(spec, key);
            }
            let mut permuted = Statistics::new();
            for (key, spec) in &shuffled {
                permuted.update(spec, key);
            }
            prop_assert_eq!(&forward, &permuted);
            prop_assert_eq!(forward.compute_rebuild_set(), permuted.compute_rebuild_set());
        }
    }
}
