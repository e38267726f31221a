//! # Build Recognition
//!
//! The build stage of the pipeline. A [`ProjectBuilder`] receives a fetched
//! project and returns it with its `build` markers set: the detected build
//! system, the declared dependencies and either success or the reason the
//! build failed. A failed build is an ordinary outcome written into the
//! spec; an `Err` is kept for projects that cannot be processed at all.
//!
//! [`BuildRecognizer`] is the default builder. It looks for the marker file
//! of a known build system in the checkout and runs that system's tools,
//! building into `build/<key>` and installing into `target/<key>`.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use serde_json::Value;

use crate::context::WorkerContext;
use crate::error::{Error, Result};
use crate::fetcher::{checkout_dir_name, MISSING_TOOLCHAIN};
use crate::project::{self, Project};

pub const UNRECOGNIZED: &str = "unrecognized build system";
pub const COMMAND_FAILED: &str = "build command failed";

/// Builds a fetched project.
pub trait ProjectBuilder: Send + Sync {
    fn recognize_and_build(&self, project: Project, ctx: &mut WorkerContext) -> Result<Project>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    CMake,
    Cargo,
    Autotools,
    Make,
}

impl BuildSystem {
    /// Marker files, in detection priority.
    const MARKERS: [(&'static str, BuildSystem); 4] = [
        ("CMakeLists.txt", BuildSystem::CMake),
        ("Cargo.toml", BuildSystem::Cargo),
        ("configure", BuildSystem::Autotools),
        ("Makefile", BuildSystem::Make),
    ];

    pub fn detect(source: &Path) -> Option<Self> {
        Self::MARKERS
            .iter()
            .find(|(marker, _)| source.join(marker).is_file())
            .map(|(_, system)| *system)
    }

    pub fn name(self) -> &'static str {
        match self {
            BuildSystem::CMake => "cmake",
            BuildSystem::Cargo => "cargo",
            BuildSystem::Autotools => "autotools",
            BuildSystem::Make => "make",
        }
    }

    /// The commands building `source`, in order.
    pub fn steps(self, source: &Path, build: &Path, target: &Path, jobs: usize) -> Vec<BuildStep> {
        let jobs = jobs.max(1).to_string();
        match self {
            BuildSystem::CMake => vec![
                BuildStep::new("cmake", build)
                    .arg("-S")
                    .arg(source)
                    .arg("-B")
                    .arg(build)
                    .arg(format!("-DCMAKE_INSTALL_PREFIX={}", target.display())),
                BuildStep::new("cmake", build)
                    .args(["--build", "."])
                    .args(["--parallel", jobs.as_str()]),
                BuildStep::new("cmake", build).args(["--install", "."]),
            ],
            BuildSystem::Cargo => vec![BuildStep::new("cargo", source)
                .args(["build", "--release", "--jobs", jobs.as_str()])
                .arg("--target-dir")
                .arg(build)],
            BuildSystem::Autotools => vec![
                BuildStep::new(source.join("configure"), build)
                    .arg(format!("--prefix={}", target.display())),
                BuildStep::new("make", build).arg(format!("-j{}", jobs)),
                BuildStep::new("make", build).arg("install"),
            ],
            BuildSystem::Make => vec![
                BuildStep::new("make", source).arg(format!("-j{}", jobs)),
                BuildStep::new("make", source)
                    .arg(format!("PREFIX={}", target.display()))
                    .arg("install"),
            ],
        }
    }
}

/// One external command of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
}

impl BuildStep {
    pub fn new(program: impl Into<OsString>, cwd: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Printable command line.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the step, sending its stderr to the worker's error log on
    /// failure. Returns the failure reason when the step did not succeed.
    pub fn run(&self, project: &Project, ctx: &mut WorkerContext) -> Result<Option<&'static str>> {
        debug!("{}: running {}", project.key, self.command_line());
        let output = match Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .output()
        {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.err.project(
                    project,
                    &format!("{} not found", self.program.to_string_lossy()),
                )?;
                return Ok(Some(MISSING_TOOLCHAIN));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if output.status.success() {
            return Ok(None);
        }
        ctx.err
            .project(project, &format!("{} failed", self.command_line()))?;
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            ctx.err.line(line)?;
        }
        Ok(Some(COMMAND_FAILED))
    }
}

/// Detects and runs the project's build system.
#[derive(Debug, Clone, Default)]
pub struct BuildRecognizer;

impl BuildRecognizer {
    pub fn new() -> Self {
        Self
    }
}

impl ProjectBuilder for BuildRecognizer {
    fn recognize_and_build(&self, mut project: Project, ctx: &mut WorkerContext) -> Result<Project> {
        let source = project
            .spec
            .get(project::FETCH)
            .and_then(|fetch| fetch.get("dir"))
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| Error::InvalidSpec {
                key: project.key.clone(),
                message: "no fetched source directory".to_string(),
            })?;
        let declared = project::declared_dependencies(&project.spec);
        project::set_dependencies(&mut project.spec, &declared);

        match BuildSystem::detect(&source) {
            None => project::mark_build_failed(&mut project.spec, UNRECOGNIZED),
            Some(system) => {
                let relative = checkout_dir_name(&project.key);
                let build = ctx.dirs().build.join(&relative);
                let target = ctx.dirs().target.join(&relative);
                fs::create_dir_all(&build)?;
                fs::create_dir_all(&target)?;
                ctx.out
                    .project(&project, &format!("building with {}", system.name()))?;

                let mut failure = None;
                for step in system.steps(&source, &build, &target, ctx.config().build.jobs) {
                    failure = step.run(&project, ctx)?;
                    if failure.is_some() {
                        break;
                    }
                }
                match failure {
                    None => project::mark_built(&mut project.spec, system.name()),
                    Some(reason) => {
                        project::mark_build_failed(&mut project.spec, reason);
                        if let Some(build) = project
                            .spec
                            .get_mut(project::BUILD)
                            .and_then(Value::as_object_mut)
                        {
                            build.insert(project::SYSTEM.to_string(), system.name().into());
                        }
                    }
                }
            }
        }

        ctx.record(&project)?;
        Ok(project)
    }
}
