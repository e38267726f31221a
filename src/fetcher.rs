//! # Fetch Adapters
//!
//! A [`Fetcher`] brings a repository's source onto the local disk and
//! records where it put it (`fetch.dir`). One adapter serves one repository
//! database; the orchestrator asks a [`FetcherRegistry`] for the adapter of
//! every database before the run starts, so an unknown database fails the
//! run instead of every project in it.
//!
//! The default registry, [`DefaultFetchers`], knows two kinds of sources:
//!
//! - Git hosts (`github.org`, `gitlab.com`, `git`): [`GitFetcher`] shallow
//!   clones `spec.url`, at `spec.ref` when given, using the system `git`
//!   command so the user's SSH keys and credential helpers apply.
//! - `local`: [`LocalFetcher`] uses the existing directory `spec.path`.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::context::WorkerContext;
use crate::error::{Error, Result};
use crate::project::{self, Project};

/// Reason recorded when the tool a stage needs is not installed.
pub const MISSING_TOOLCHAIN: &str = "missing toolchain";

/// Fetches the sources of one repository database.
pub trait Fetcher: Send + Sync {
    /// Fetch one project, returning it with its fetch markers set.
    fn fetch(&self, project: Project, ctx: &mut WorkerContext) -> Result<Project>;

    /// Called once every fetch of the database reached a terminal state.
    fn finish(&self) {}
}

/// Hands out the fetch adapter for a repository database.
pub trait FetcherRegistry {
    fn adapter(&self, database: &str, source_dir: &Path) -> Result<Arc<dyn Fetcher>>;
}

/// Registry of the built-in adapters.
#[derive(Debug, Clone, Default)]
pub struct DefaultFetchers {
    force_update: bool,
}

impl DefaultFetchers {
    /// With `force_update`, existing git checkouts are cloned again.
    pub fn new(force_update: bool) -> Self {
        Self { force_update }
    }
}

impl FetcherRegistry for DefaultFetchers {
    fn adapter(&self, database: &str, source_dir: &Path) -> Result<Arc<dyn Fetcher>> {
        match database {
            "github.org" | "gitlab.com" | "git" => Ok(Arc::new(GitFetcher::new(
                database,
                source_dir.join(checkout_dir_name(database)),
                self.force_update,
            ))),
            "local" => Ok(Arc::new(LocalFetcher::default())),
            other => Err(Error::UnknownDatabase {
                database: other.to_string(),
            }),
        }
    }
}

/// Shallow clones repositories with the system `git`.
#[derive(Debug)]
pub struct GitFetcher {
    database: String,
    root: PathBuf,
    force_update: bool,
    cloned: AtomicUsize,
    reused: AtomicUsize,
}

impl GitFetcher {
    pub fn new(database: impl Into<String>, root: impl Into<PathBuf>, force_update: bool) -> Self {
        Self {
            database: database.into(),
            root: root.into(),
            force_update,
            cloned: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Checkout directory of `key`.
    pub fn checkout_dir(&self, key: &str) -> PathBuf {
        self.root.join(checkout_dir_name(key))
    }

    pub fn cloned(&self) -> usize {
        self.cloned.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

impl Fetcher for GitFetcher {
    fn fetch(&self, mut project: Project, ctx: &mut WorkerContext) -> Result<Project> {
        let url = required_str(&project, "url")?;
        let reference = project
            .spec
            .get("ref")
            .and_then(Value::as_str)
            .map(str::to_string);
        let target = self.checkout_dir(&project.key);

        if target.join(".git").is_dir() && !self.force_update {
            ctx.out.project(&project, "reusing existing checkout")?;
            self.reused.fetch_add(1, Ordering::Relaxed);
        } else {
            ctx.out.project(&project, &format!("cloning {}", url))?;
            match clone_shallow(&project.key, &url, reference.as_deref(), &target) {
                Ok(()) => {
                    self.cloned.fetch_add(1, Ordering::Relaxed);
                }
                Err(Error::Command { key, stderr, .. }) => {
                    ctx.err.project(&project, "git clone failed")?;
                    for line in stderr.lines() {
                        ctx.err.line(line)?;
                    }
                    return Err(Error::Fetch {
                        key,
                        reason: clone_failure_reason(&stderr).to_string(),
                    });
                }
                Err(other) => return Err(other),
            }
        }

        project::mark_fetched(&mut project.spec, &target.to_string_lossy());
        Ok(project)
    }

    fn finish(&self) {
        info!(
            "{}: {} repositories cloned, {} checkouts reused",
            self.database,
            self.cloned(),
            self.reused()
        );
    }
}

/// Uses source trees that already exist on disk.
#[derive(Debug, Default)]
pub struct LocalFetcher {
    found: AtomicUsize,
}

impl LocalFetcher {
    pub fn found(&self) -> usize {
        self.found.load(Ordering::Relaxed)
    }
}

impl Fetcher for LocalFetcher {
    fn fetch(&self, mut project: Project, ctx: &mut WorkerContext) -> Result<Project> {
        let path = required_str(&project, "path")?;
        if !Path::new(&path).is_dir() {
            return Err(Error::Fetch {
                key: project.key.clone(),
                reason: "source directory not found".to_string(),
            });
        }
        ctx.out.project(&project, &format!("using {}", path))?;
        self.found.fetch_add(1, Ordering::Relaxed);
        project::mark_fetched(&mut project.spec, &path);
        Ok(project)
    }

    fn finish(&self) {
        info!("local: {} source directories found", self.found());
    }
}

fn required_str(project: &Project, field: &str) -> Result<String> {
    project
        .spec
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidSpec {
            key: project.key.clone(),
            message: format!("missing '{}'", field),
        })
}

/// Clone `url` with `--depth=1` into `target_dir`, replacing whatever is
/// there.
pub fn clone_shallow(
    key: &str,
    url: &str,
    reference: Option<&str>,
    target_dir: &Path,
) -> Result<()> {
    // git refuses to clone into a non-empty directory
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut command = Command::new("git");
    command.args(["clone", "--depth=1"]);
    if let Some(reference) = reference {
        command.args(["--branch", reference]);
    }
    command.arg(url).arg(target_dir);
    debug!("{}: running {:?}", key, command);

    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Fetch {
                key: key.to_string(),
                reason: MISSING_TOOLCHAIN.to_string(),
            }
        } else {
            Error::Io(e)
        }
    })?;

    if !output.status.success() {
        return Err(Error::Command {
            key: key.to_string(),
            command: "git clone".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

/// Short reason for a failed clone, from git's stderr.
pub fn clone_failure_reason(stderr: &str) -> &'static str {
    if stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("could not read Username")
    {
        "authentication failed"
    } else if stderr.contains("Remote branch") {
        "unknown ref"
    } else if stderr.contains("not found") || stderr.contains("does not exist") {
        "repository not found"
    } else if stderr.contains("Could not resolve host") {
        "host unreachable"
    } else {
        "git clone failed"
    }
}

/// Filesystem-safe relative directory for a repository key.
///
/// `/` keeps separating directories; every other character that is not
/// alphanumeric, `.`, `-` or `_` becomes `_`, and components that would
/// leave the parent (`..`, `.`, roots) are replaced as well. When any of
/// this changed the key, the last component gets a short hash of the raw
/// key, so two keys never share a checkout.
pub fn checkout_dir_name(key: &str) -> PathBuf {
    let mut segments: Vec<String> = key
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let encoded: String = segment
                .chars()
                .map(|c| match c {
                    c if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
                    _ => '_',
                })
                .collect();
            match Path::new(&encoded).components().next() {
                Some(Component::Normal(_)) => encoded,
                _ => encoded.replace('.', "_"),
            }
        })
        .collect();
    if segments.is_empty() {
        segments.push("_".to_string());
    }
    if segments.join("/") != key {
        let digest = Sha256::digest(key.as_bytes());
        let suffix: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        if let Some(last) = segments.last_mut() {
            last.push('-');
            last.push_str(&suffix);
        }
    }
    segments.iter().collect()
}
