//! # Projects and the Repository Database
//!
//! The input of a run is a repository database: a JSON object mapping a
//! database name (the source host, such as `github.org`) to the repositories
//! it holds, each described by an opaque JSON spec.
//!
//! ```json
//! {
//!   "github.org": {
//!     "fmtlib/fmt": { "url": "https://github.com/fmtlib/fmt.git" }
//!   }
//! }
//! ```
//!
//! Stages enrich a spec with outcome markers. After a run every spec carries
//! a top-level `status` of `success` or `failure`, plus `fetch` and `build`
//! objects describing what each stage did. The helpers in this module are the
//! only place those marker names are spelled out.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Map, Value};

/// Database name → repository key → spec.
pub type RepositoryDatabase = BTreeMap<String, BTreeMap<String, Value>>;

/// One repository travelling through the pipeline.
///
/// `index` is 1-based and unique across every database group of a run; it
/// drives the `[index/total]` progress lines of worker logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub index: usize,
    pub key: String,
    pub spec: Value,
}

impl Project {
    pub fn new(index: usize, key: impl Into<String>, spec: Value) -> Self {
        Self {
            index,
            key: key.into(),
            spec,
        }
    }
}

/// Final classification of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failure => "failure",
        }
    }
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Fetch,
    Build,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Build => "build",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const STATUS: &str = "status";
pub const FETCH: &str = "fetch";
pub const BUILD: &str = "build";
pub const ERROR: &str = "error";
pub const SYSTEM: &str = "system";
pub const DEPENDENCIES: &str = "dependencies";
pub const NOT_ATTEMPTED: &str = "not_attempted";
pub const CANCELLED: &str = "cancelled";

/// Reason recorded when a stage panicked.
pub const CANCELLED_REASON: &str = "cancelled";

/// Reason recorded when a failed spec names no reason.
pub const UNKNOWN_REASON: &str = "unknown";

/// Make sure `spec` is a JSON object, wrapping any other value as
/// `{"spec": value}`, and return the object.
pub fn ensure_object(spec: &mut Value) -> &mut Map<String, Value> {
    if !spec.is_object() {
        let original = spec.take();
        *spec = json!({ "spec": original });
    }
    match spec {
        Value::Object(map) => map,
        _ => unreachable!("spec was just converted to an object"),
    }
}

/// Return the object stored under `name`, creating or replacing it.
fn section<'a>(spec: &'a mut Value, name: &str) -> &'a mut Map<String, Value> {
    let object = ensure_object(spec);
    let entry = object
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(map) => map,
        _ => unreachable!("section was just converted to an object"),
    }
}

fn set_status(spec: &mut Value, status: Status) {
    ensure_object(spec).insert(STATUS.to_string(), Value::from(status.as_str()));
}

/// Drop the outcome markers a spec carries from an earlier run, so a
/// database exported by one run can be fed into the next.
pub fn clear_markers(spec: &mut Value) {
    let object = ensure_object(spec);
    for marker in [STATUS, FETCH, BUILD] {
        object.remove(marker);
    }
}

/// Record a successful fetch into `dir`.
pub fn mark_fetched(spec: &mut Value, dir: &str) {
    let fetch = section(spec, FETCH);
    fetch.insert(STATUS.to_string(), Value::from(Status::Success.as_str()));
    fetch.insert("dir".to_string(), Value::from(dir));
    fetch.remove(ERROR);
}

/// Record a fetch failure. The build stage is marked as never attempted,
/// replacing whatever it recorded before.
pub fn mark_fetch_failed(spec: &mut Value, reason: &str) {
    let fetch = section(spec, FETCH);
    fetch.insert(STATUS.to_string(), Value::from(Status::Failure.as_str()));
    fetch.insert(ERROR.to_string(), Value::from(reason));
    let mut build = Map::new();
    build.insert(STATUS.to_string(), Value::from(NOT_ATTEMPTED));
    ensure_object(spec).insert(BUILD.to_string(), Value::Object(build));
    set_status(spec, Status::Failure);
}

/// Record a successful build performed by `system`.
pub fn mark_built(spec: &mut Value, system: &str) {
    let build = section(spec, BUILD);
    build.insert(STATUS.to_string(), Value::from(Status::Success.as_str()));
    build.insert(SYSTEM.to_string(), Value::from(system));
    build.remove(ERROR);
    set_status(spec, Status::Success);
}

/// Record a build failure with its reason.
pub fn mark_build_failed(spec: &mut Value, reason: &str) {
    let build = section(spec, BUILD);
    build.insert(STATUS.to_string(), Value::from(Status::Failure.as_str()));
    build.insert(ERROR.to_string(), Value::from(reason));
    set_status(spec, Status::Failure);
}

/// Record a project whose stage panicked before resolving.
pub fn mark_cancelled(spec: &mut Value) {
    let build = section(spec, BUILD);
    build.insert(STATUS.to_string(), Value::from(CANCELLED));
    build.insert(ERROR.to_string(), Value::from(CANCELLED_REASON));
    set_status(spec, Status::Failure);
}

/// Record the dependency keys a project declared.
pub fn set_dependencies(spec: &mut Value, dependencies: &[String]) {
    let build = section(spec, BUILD);
    build.insert(
        DEPENDENCIES.to_string(),
        Value::from(dependencies.to_vec()),
    );
}

/// Give a spec returned by the build stage a top-level status.
///
/// A build collaborator normally sets it; when it did not, the status is
/// derived from `build.status`, and a spec with no build failure counts as
/// a success.
pub fn finalize(spec: &mut Value) {
    if status(spec).is_some() {
        return;
    }
    let failed = spec
        .get(BUILD)
        .and_then(|build| build.get(STATUS))
        .and_then(Value::as_str)
        .is_some_and(|status| status != Status::Success.as_str());
    if failed {
        set_status(spec, Status::Failure);
    } else {
        set_status(spec, Status::Success);
    }
}

/// The top-level status of a spec, if it has one.
pub fn status(spec: &Value) -> Option<Status> {
    match spec.get(STATUS).and_then(Value::as_str) {
        Some("success") => Some(Status::Success),
        Some("failure") => Some(Status::Failure),
        _ => None,
    }
}

/// Stage and reason of a failed spec.
///
/// The build error wins over the fetch error; a failure without any recorded
/// reason is attributed to the build stage with reason `unknown`.
pub fn failure(spec: &Value) -> (Stage, String) {
    let reason_of = |stage: &str| {
        spec.get(stage)
            .and_then(|section| section.get(ERROR))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    if let Some(reason) = reason_of(BUILD) {
        (Stage::Build, reason)
    } else if let Some(reason) = reason_of(FETCH) {
        (Stage::Fetch, reason)
    } else {
        (Stage::Build, UNKNOWN_REASON.to_string())
    }
}

/// Dependency keys recorded by the build stage.
pub fn dependencies(spec: &Value) -> Vec<String> {
    spec.get(BUILD)
        .and_then(|build| build.get(DEPENDENCIES))
        .and_then(Value::as_array)
        .map(|deps| {
            deps.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build system recorded by the build stage.
pub fn build_system(spec: &Value) -> Option<&str> {
    spec.get(BUILD)
        .and_then(|build| build.get(SYSTEM))
        .and_then(Value::as_str)
}

/// Dependency keys declared in the input spec itself.
pub fn declared_dependencies(spec: &Value) -> Vec<String> {
    spec.get(DEPENDENCIES)
        .and_then(Value::as_array)
        .map(|deps| {
            deps.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Total number of repositories across every database.
pub fn count_projects(repositories: &RepositoryDatabase) -> usize {
    repositories.values().map(BTreeMap::len).sum()
}
