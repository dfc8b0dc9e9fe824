//! Picking a workspace to run in: reuse an idle one, or create a new
//! worktree on request.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Duration;
use thiserror::Error;

use super::identity::RepositoryId;
use super::lock::{LockError, LockInfo, LockRequest, LockStatus, WorkspaceLock, lock_status};
use super::registry::{RegistryError, WorkspaceEntry, WorkspaceRegistry};
use crate::vcs::{Vcs, VcsError};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no workspace available: {}", summarize(attempts))]
    Unavailable { attempts: Vec<ReuseAttempt> },

    #[error("workspace path already exists: {}", .0.display())]
    PathExists(PathBuf),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn summarize(attempts: &[ReuseAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.path.display(), a.outcome))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a candidate was passed over.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Missing,
    Locked(Option<Box<LockInfo>>),
    Dirty,
    Error(String),
    PrepareFailed(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Locked(Some(info)) => write!(f, "locked by {}", info.describe()),
            Self::Locked(None) => write!(f, "locked"),
            Self::Dirty => write!(f, "uncommitted changes"),
            Self::Error(e) => write!(f, "error: {e}"),
            Self::PrepareFailed(e) => write!(f, "preparation failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReuseAttempt {
    pub path: PathBuf,
    pub outcome: AttemptOutcome,
}

/// A workspace that passed selection, locked for the caller.
#[derive(Debug)]
pub struct ReusedWorkspace {
    pub path: PathBuf,
    pub lock: WorkspaceLock,
    /// Branch checked out before preparation.
    pub previous_branch: Option<String>,
    /// Candidates skipped before this one.
    pub skipped: Vec<ReuseAttempt>,
}

/// Try `candidates` in order and return the first usable one, locked and
/// prepared.
///
/// A candidate is skipped when it is missing, holds a live lock, or has
/// uncommitted changes. When `prepare` fails the previous branch is
/// restored and the lock released before moving on.
pub fn select_workspace<F>(
    vcs: &dyn Vcs,
    candidates: &[PathBuf],
    request: &LockRequest,
    max_age: Duration,
    mut prepare: F,
) -> Result<ReusedWorkspace, WorkspaceError>
where
    F: FnMut(&Path) -> anyhow::Result<()>,
{
    let mut attempts = Vec::new();

    for path in candidates {
        let skip = |outcome: AttemptOutcome| {
            tracing::debug!(workspace = %path.display(), %outcome, "skipping workspace");
            ReuseAttempt {
                path: path.clone(),
                outcome,
            }
        };

        if !path.is_dir() {
            attempts.push(skip(AttemptOutcome::Missing));
            continue;
        }
        match lock_status(path, max_age) {
            Ok(LockStatus::Held(info)) => {
                attempts.push(skip(AttemptOutcome::Locked(Some(Box::new(info)))));
                continue;
            }
            Ok(LockStatus::Unlocked | LockStatus::Stale(_)) => {}
            Err(e) => {
                attempts.push(skip(AttemptOutcome::Error(e.to_string())));
                continue;
            }
        }
        match vcs.is_dirty(path) {
            Ok(false) => {}
            Ok(true) => {
                attempts.push(skip(AttemptOutcome::Dirty));
                continue;
            }
            Err(e) => {
                attempts.push(skip(AttemptOutcome::Error(e.to_string())));
                continue;
            }
        }

        let lock = match WorkspaceLock::acquire(path, request, max_age) {
            Ok(lock) => lock,
            Err(LockError::Held { info, .. }) => {
                attempts.push(skip(AttemptOutcome::Locked(info)));
                continue;
            }
            Err(e) => {
                attempts.push(skip(AttemptOutcome::Error(e.to_string())));
                continue;
            }
        };

        let previous_branch = match vcs.current_branch(path) {
            Ok(branch) => branch,
            Err(e) => {
                release_quietly(lock);
                attempts.push(skip(AttemptOutcome::Error(e.to_string())));
                continue;
            }
        };

        if let Err(e) = prepare(path) {
            if let Some(ref branch) = previous_branch {
                if let Err(restore) = vcs.checkout(path, branch) {
                    tracing::warn!(
                        workspace = %path.display(),
                        branch,
                        error = %restore,
                        "failed to restore branch after preparation error"
                    );
                }
            }
            release_quietly(lock);
            attempts.push(skip(AttemptOutcome::PrepareFailed(format!("{e:#}"))));
            continue;
        }

        tracing::info!(workspace = %path.display(), skipped = attempts.len(), "reusing workspace");
        return Ok(ReusedWorkspace {
            path: path.clone(),
            lock,
            previous_branch,
            skipped: attempts,
        });
    }

    Err(WorkspaceError::Unavailable { attempts })
}

fn release_quietly(lock: WorkspaceLock) {
    let path = lock.path().to_path_buf();
    if let Err(e) = lock.release() {
        tracing::warn!(path = %path.display(), error = %e, "failed to release workspace lock");
    }
}

/// Default preparation: check out `branch`, creating it from trunk when it
/// does not exist yet. An existing branch keeps its commits.
pub fn checkout_from_trunk<'a>(
    vcs: &'a dyn Vcs,
    branch: &'a str,
) -> impl FnMut(&Path) -> anyhow::Result<()> + 'a {
    move |path| {
        if vcs.branch_exists(path, branch)? {
            vcs.checkout(path, branch)?;
        } else {
            let trunk = vcs.trunk_branch(path)?;
            vcs.create_branch(path, branch, &trunk)?;
        }
        Ok(())
    }
}

/// Create a new worktree of `repo_root` at `worktree_base/name` on
/// `branch` and register it.
pub fn create_workspace(
    vcs: &dyn Vcs,
    repo_root: &Path,
    worktree_base: &Path,
    name: &str,
    branch: &str,
    registry: &WorkspaceRegistry,
    repository_id: &RepositoryId,
) -> Result<PathBuf, WorkspaceError> {
    let path = worktree_base.join(name);
    if path.exists() {
        return Err(WorkspaceError::PathExists(path));
    }
    vcs.add_worktree(repo_root, &path, branch)?;

    let mut entry = WorkspaceEntry::new(path.clone(), repository_id);
    entry.branch = Some(branch.to_string());
    registry.upsert(entry)?;
    tracing::info!(workspace = %path.display(), branch, "created workspace");
    Ok(path)
}
