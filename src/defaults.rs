//! Default values for code-builder runs.
//!
//! This module provides centralized default values used by the CLI and the
//! orchestrator, including the fixed artifact file names.

use std::path::PathBuf;

/// Default directory for statistics artifacts and run snapshots.
pub const ARTIFACTS_DIR: &str = "buildlogs";

/// Default build directory.
pub const BUILD_DIR: &str = "build";

/// Default directory for build results.
pub const RESULTS_DIR: &str = "results";

/// Default application configuration file.
pub const APP_CONFIG_FILE: &str = "build.cfg";

/// Default user configuration file.
pub const USER_CONFIG_FILE: &str = "user.cfg";

/// Projects to rebuild in an incremental run.
pub const REBUILD_FILE: &str = "rebuild.json";

/// Failure stage and reason per project.
pub const ERRORS_FILE: &str = "errors.json";

/// Failure reason histogram.
pub const ERROR_STATS_FILE: &str = "error_stats.json";

/// Declared dependency graph.
pub const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Returns the default root for fetched sources.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/code-builder/sources` (XDG Base Directory)
/// - macOS: `~/Library/Caches/code-builder/sources`
/// - Windows: `{FOLDERID_LocalAppData}\code-builder\sources`
///
/// Falls back to `.code-builder-sources` in the current directory if the
/// platform cache directory cannot be determined.
pub fn default_source_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("code-builder").join("sources"))
        .unwrap_or_else(|| PathBuf::from(".code-builder-sources"))
}

/// Worker count used when the configuration does not name one.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}
