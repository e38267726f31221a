//! Build command implementation
//!
//! Reads a repository database, fetches and builds every repository in it
//! and prints the run summary. Project failures are part of a completed
//! run; only run errors (unreadable input, unknown repository databases,
//! artifact I/O) make the command fail.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use log::info;

use code_builder::config::RunConfig;
use code_builder::context::BuildDirs;
use code_builder::defaults;
use code_builder::fetcher::DefaultFetchers;
use code_builder::orchestrator::{build_projects, BuildRun};
use code_builder::project::{count_projects, RepositoryDatabase};
use code_builder::recognizer::BuildRecognizer;

/// Arguments for the build command
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// JSON repository database: database name -> repository key -> spec
    #[arg(value_name = "REPOSITORIES_DB")]
    pub repositories_db: PathBuf,

    /// Directory receiving fetched sources
    #[arg(long, value_name = "PATH", env = "CODE_BUILDER_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Directory for intermediate build trees
    #[arg(long, value_name = "PATH", default_value = defaults::BUILD_DIR)]
    pub build_dir: PathBuf,

    /// Directory receiving build results
    #[arg(long, value_name = "PATH", default_value = defaults::RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Application configuration file
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// User configuration file, overriding the application file
    #[arg(long, value_name = "PATH")]
    pub user_config_file: Option<PathBuf>,

    /// Write the final repository database to this file
    #[arg(long, value_name = "PATH")]
    pub export_repositories: Option<PathBuf>,

    /// Write per-worker logs into this directory instead of stdout/stderr
    #[arg(long, value_name = "DIR")]
    pub log_to_file: Option<PathBuf>,

    /// Fetch repositories again even when a checkout exists
    #[arg(long)]
    pub build_force_update: bool,

    /// Only build the keys listed in a rebuild.json of a previous run
    #[arg(long, value_name = "PATH")]
    pub rebuild_only: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Execute the build command
pub fn execute(args: BuildArgs) -> Result<()> {
    let mut config = load_config(&args)?;
    if let Some(dir) = &args.log_to_file {
        config.output.log_dir = Some(dir.clone());
    }
    if args.build_force_update {
        config.build.force_update = true;
    }

    let repositories = read_database(&args.repositories_db)?;
    let (selected, mut repositories) = match &args.rebuild_only {
        Some(path) => {
            let keys = read_rebuild_set(path)?;
            let (selected, rest) = partition(repositories, &keys);
            info!(
                "Rebuilding {} of {} projects",
                count_projects(&selected),
                count_projects(&selected) + count_projects(&rest)
            );
            (selected, rest)
        }
        None => (repositories, RepositoryDatabase::new()),
    };

    let dirs = BuildDirs::new(
        args.source_dir
            .clone()
            .unwrap_or_else(defaults::default_source_root),
        args.build_dir.clone(),
        args.results_dir.clone(),
    );
    let fetchers = DefaultFetchers::new(config.build.force_update);
    let run = BuildRun {
        dirs,
        config,
        fetchers: &fetchers,
        builder: Arc::new(BuildRecognizer::new()),
    };

    let stdout = io::stdout();
    let built = build_projects(&run, selected, &mut stdout.lock()).context("Build run failed")?;
    for (database, entries) in built {
        repositories.entry(database).or_default().extend(entries);
    }

    if let Some(path) = &args.export_repositories {
        export_database(path, &repositories)
            .with_context(|| format!("Failed to export repositories to {}", path.display()))?;
        info!("Repositories exported to {}", path.display());
    }
    Ok(())
}

fn load_config(args: &BuildArgs) -> Result<RunConfig> {
    for path in [&args.config_file, &args.user_config_file].into_iter().flatten() {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
    }
    let app = args
        .config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults::APP_CONFIG_FILE));
    let user = args
        .user_config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(defaults::USER_CONFIG_FILE));
    RunConfig::load(Some(&app), Some(&user)).context("Failed to load configuration")
}

fn read_database(path: &Path) -> Result<RepositoryDatabase> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Repository database not found: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid repository database: {}", path.display()))
}

fn read_rebuild_set(path: &Path) -> Result<BTreeSet<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Rebuild list not found: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid rebuild list: {}", path.display()))
}

/// Split `repositories` into the entries whose key is in `keys` and the rest.
fn partition(
    repositories: RepositoryDatabase,
    keys: &BTreeSet<String>,
) -> (RepositoryDatabase, RepositoryDatabase) {
    let mut selected = RepositoryDatabase::new();
    let mut rest = RepositoryDatabase::new();
    for (database, entries) in repositories {
        for (key, spec) in entries {
            let side = if keys.contains(&key) {
                &mut selected
            } else {
                &mut rest
            };
            side.entry(database.clone()).or_default().insert(key, spec);
        }
    }
    (selected, rest)
}

fn export_database(path: &Path, repositories: &RepositoryDatabase) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, repositories)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
