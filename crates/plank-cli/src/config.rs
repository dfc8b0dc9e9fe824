//! Configuration file management for plank.
//!
//! Provides a TOML-based config file at `~/.config/plank/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use plank_core::vcs::{GitCli, Vcs};
use plank_store::config::StoreConfig;

pub const DATA_DIR_ENV: &str = "PLANK_DATA_DIR";
pub const USER_ENV: &str = "PLANK_USER";

const DEFAULT_STALE_LOCK_HOURS: i64 = 24;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub user: UserSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PathsSection {
    /// Plan files directory; relative paths are anchored at the repository
    /// root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_dir: Option<PathBuf>,
    /// Claims, registry, and worktrees live here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trunk_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_lock_hours: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_base: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the plank config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/plank` or `~/.config/plank`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("plank");
    }
    home().join(".config").join("plank")
}

/// Return the path to the plank config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default data directory: `$XDG_DATA_HOME/plank` or `~/.local/share/plank`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("plank");
    }
    home().join(".local").join("share").join("plank")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. A missing file is an empty config.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line; `None` defers to the next source.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub tasks_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub user: Option<String>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct PlankConfig {
    pub tasks_dir: PathBuf,
    pub data_dir: PathBuf,
    pub user: Option<String>,
    pub trunk_branch: Option<String>,
    pub stale_after: Duration,
    pub worktree_base: PathBuf,
    /// Root of the enclosing git repository, when there is one.
    pub repo_root: Option<PathBuf>,
}

impl PlankConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - Tasks dir: `--tasks-dir` > `PLANK_TASKS_DIR` > `paths.tasks_dir` >
    ///   `tasks`, anchored at the repository root (or `cwd` outside one)
    /// - Data dir: `--data-dir` > `PLANK_DATA_DIR` > `paths.data_dir` >
    ///   `$XDG_DATA_HOME/plank`
    /// - User: `--user` > `PLANK_USER` > `user.name` > `$USER`
    pub fn resolve(overrides: &Overrides, cwd: &Path) -> Result<Self> {
        let file = load_config()?;
        let repo_root = GitCli::new().repo_root(cwd).ok();
        let anchor = repo_root.as_deref().unwrap_or(cwd);

        let tasks_dir = if let Some(ref dir) = overrides.tasks_dir {
            dir.clone()
        } else if let Ok(dir) = std::env::var(StoreConfig::TASKS_DIR_ENV) {
            PathBuf::from(dir)
        } else if let Some(ref dir) = file.paths.tasks_dir {
            dir.clone()
        } else {
            PathBuf::from(StoreConfig::DEFAULT_TASKS_DIR)
        };
        let tasks_dir = StoreConfig::new(tasks_dir).anchored_at(anchor);

        let data_dir = if let Some(ref dir) = overrides.data_dir {
            dir.clone()
        } else if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(dir)
        } else if let Some(ref dir) = file.paths.data_dir {
            dir.clone()
        } else {
            default_data_dir()
        };

        let user = overrides
            .user
            .clone()
            .or_else(|| std::env::var(USER_ENV).ok())
            .or(file.user.name)
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.is_empty());

        let hours = file
            .workspace
            .stale_lock_hours
            .unwrap_or(DEFAULT_STALE_LOCK_HOURS);
        if hours <= 0 {
            anyhow::bail!("workspace.stale_lock_hours must be positive, got {hours}");
        }

        let worktree_base = file
            .workspace
            .worktree_base
            .unwrap_or_else(|| data_dir.join("worktrees"));

        Ok(Self {
            tasks_dir,
            data_dir,
            user,
            trunk_branch: file.workspace.trunk_branch,
            stale_after: Duration::hours(hours),
            worktree_base,
            repo_root,
        })
    }

    /// Git access honouring the configured trunk branch.
    pub fn vcs(&self) -> GitCli {
        match self.trunk_branch {
            Some(ref trunk) => GitCli::with_trunk(trunk.clone()),
            None => GitCli::new(),
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
