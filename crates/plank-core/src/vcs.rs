//! Version control access.
//!
//! The coordination layer needs a handful of questions answered about a
//! working copy (current branch, changed files, dirty state) and a few
//! mutations (checkout, branch creation, worktree creation). [`Vcs`]
//! captures exactly those; [`GitCli`] answers them by running `git`.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Errors that can occur during version control operations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The path does not exist or is not inside a git repository.
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    /// A git command failed to execute.
    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// No trunk branch could be determined.
    #[error("could not determine trunk branch (tried {0})")]
    NoTrunk(String),
}

/// Version control operations used by plank, all relative to a working
/// copy directory.
pub trait Vcs {
    /// Top-level directory of the working copy containing `dir`.
    fn repo_root(&self, dir: &Path) -> Result<PathBuf, VcsError>;

    /// Name of the checked out branch, or `None` on a detached HEAD.
    fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError>;

    /// Name of the trunk branch (e.g. `main`).
    fn trunk_branch(&self, dir: &Path) -> Result<String, VcsError>;

    /// Files changed on the current branch relative to trunk, as paths
    /// relative to the repository root. Includes uncommitted changes.
    fn changed_files_vs_trunk(&self, dir: &Path, trunk: &str) -> Result<Vec<PathBuf>, VcsError>;

    /// Whether the working tree has uncommitted changes (untracked files
    /// included).
    fn is_dirty(&self, dir: &Path) -> Result<bool, VcsError>;

    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), VcsError>;

    /// Whether a local branch named `branch` exists.
    fn branch_exists(&self, dir: &Path, branch: &str) -> Result<bool, VcsError>;

    /// Create `branch` from `start` and check it out. Fails when `branch`
    /// already exists.
    fn create_branch(&self, dir: &Path, branch: &str, start: &str) -> Result<(), VcsError>;

    /// Stage everything and commit.
    fn commit(&self, dir: &Path, message: &str) -> Result<(), VcsError>;

    /// URL of the `origin` remote, if configured.
    fn remote_url(&self, dir: &Path) -> Result<Option<String>, VcsError>;

    /// Add a linked worktree at `path` on a new branch `branch`.
    fn add_worktree(&self, dir: &Path, path: &Path, branch: &str) -> Result<(), VcsError>;
}

/// [`Vcs`] backed by the `git` command line.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    /// Explicit trunk branch; detected when `None`.
    trunk: Option<String>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `trunk` instead of detecting it.
    pub fn with_trunk(trunk: impl Into<String>) -> Self {
        Self {
            trunk: Some(trunk.into()),
        }
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output, VcsError> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| VcsError::GitCommand {
                message: format!("failed to run git {}", args.first().copied().unwrap_or("")),
                source: e,
            })
    }

    /// Run git and return stdout, mapping a failure exit to
    /// [`VcsError::GitExit`].
    fn run_ok(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run(dir, args)?;
        if !output.status.success() {
            return Err(VcsError::GitExit {
                command: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vcs for GitCli {
    fn repo_root(&self, dir: &Path) -> Result<PathBuf, VcsError> {
        let output = self.run(dir, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(VcsError::NotAGitRepo(dir.to_path_buf()));
        }
        Ok(PathBuf::from(
            String::from_utf8_lossy(&output.stdout).trim(),
        ))
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError> {
        let output = self.run(dir, &["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    fn trunk_branch(&self, dir: &Path) -> Result<String, VcsError> {
        if let Some(ref trunk) = self.trunk {
            return Ok(trunk.clone());
        }

        // Prefer what origin/HEAD points at.
        let output = self.run(
            dir,
            &["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"],
        )?;
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if let Some(short) = name.strip_prefix("origin/") {
                return Ok(short.to_string());
            }
        }

        const CANDIDATES: [&str; 3] = ["main", "master", "trunk"];
        for candidate in CANDIDATES {
            if self.branch_exists(dir, candidate)? {
                return Ok(candidate.to_string());
            }
        }
        Err(VcsError::NoTrunk(CANDIDATES.join(", ")))
    }

    fn changed_files_vs_trunk(&self, dir: &Path, trunk: &str) -> Result<Vec<PathBuf>, VcsError> {
        let base = self.run_ok(dir, &["merge-base", trunk, "HEAD"])?;
        let committed = self.run_ok(dir, &["diff", "--name-only", base.trim(), "HEAD"])?;
        let status = self.run_ok(dir, &["status", "--porcelain", "--untracked-files=all"])?;

        let mut files: Vec<PathBuf> = committed
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();
        for path in parse_status_paths(&status) {
            if !files.contains(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn is_dirty(&self, dir: &Path) -> Result<bool, VcsError> {
        let status = self.run_ok(dir, &["status", "--porcelain", "--untracked-files=all"])?;
        Ok(!status.trim().is_empty())
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), VcsError> {
        self.run_ok(dir, &["checkout", "--quiet", branch]).map(drop)
    }

    fn branch_exists(&self, dir: &Path, branch: &str) -> Result<bool, VcsError> {
        let output = self.run(
            dir,
            &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )?;
        Ok(output.status.success())
    }

    fn create_branch(&self, dir: &Path, branch: &str, start: &str) -> Result<(), VcsError> {
        self.run_ok(dir, &["checkout", "--quiet", "-b", branch, start])
            .map(drop)
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), VcsError> {
        self.run_ok(dir, &["add", "--all"])?;
        self.run_ok(dir, &["commit", "--quiet", "-m", message]).map(drop)
    }

    fn remote_url(&self, dir: &Path) -> Result<Option<String>, VcsError> {
        let output = self.run(dir, &["remote", "get-url", "origin"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!url.is_empty()).then_some(url))
    }

    fn add_worktree(&self, dir: &Path, path: &Path, branch: &str) -> Result<(), VcsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VcsError::GitCommand {
                message: format!("failed to create worktree base directory: {}", parent.display()),
                source: e,
            })?;
        }

        let path_str = path.to_string_lossy();
        let result = if self.branch_exists(dir, branch)? {
            self.run_ok(dir, &["worktree", "add", &path_str, branch])
        } else {
            self.run_ok(dir, &["worktree", "add", "-b", branch, &path_str])
        };

        if let Err(e) = result {
            // Clean up partial state if a directory was created.
            if path.exists() {
                tracing::warn!(path = %path.display(), "cleaning up partial worktree directory");
                let _ = std::fs::remove_dir_all(path);
            }
            let _ = self.run(dir, &["worktree", "prune"]);
            return Err(e);
        }
        Ok(())
    }
}

/// Extract paths from `git status --porcelain` output.
///
/// Each line is `XY <path>`; renames are `XY <old> -> <new>` and report the
/// new path.
fn parse_status_paths(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let rest = &line[3..];
            let path = rest.rsplit(" -> ").next().unwrap_or(rest);
            PathBuf::from(path.trim_matches('"'))
        })
        .collect()
}
