use std::env;
use std::path::PathBuf;

/// Plan store configuration.
///
/// Reads from the `PLANK_TASKS_DIR` environment variable, falling back to
/// `tasks` (relative to the working directory) when unset.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the plan files.
    pub tasks_dir: PathBuf,
}

impl StoreConfig {
    /// Environment variable overriding the tasks directory.
    pub const TASKS_DIR_ENV: &str = "PLANK_TASKS_DIR";

    /// The default tasks directory used when nothing else is configured.
    pub const DEFAULT_TASKS_DIR: &str = "tasks";

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let tasks_dir = env::var(Self::TASKS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_TASKS_DIR));
        Self { tasks_dir }
    }

    /// Build a config from an explicit directory.
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
        }
    }

    /// Anchor a relative tasks directory at `root` (usually the repository
    /// root). Absolute directories are returned unchanged.
    pub fn anchored_at(&self, root: &std::path::Path) -> PathBuf {
        if self.tasks_dir.is_absolute() {
            self.tasks_dir.clone()
        } else {
            root.join(&self.tasks_dir)
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
