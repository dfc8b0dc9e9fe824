//! Duplicate id detection and keeper selection.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use super::{Index, RenumberOptions};
use plank_store::PlanId;

/// Which rule picked the keeper of a duplicated id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperRule {
    /// Named by the caller.
    KeepList,
    /// Not modified on the current branch.
    UnchangedOnBranch,
    /// Earliest `created_at`, then path.
    EarliestCreated,
}

impl fmt::Display for KeeperRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::KeepList => "requested with --keep",
            Self::UnchangedOnBranch => "not changed on this branch",
            Self::EarliestCreated => "created first",
        };
        f.write_str(s)
    }
}

/// How one duplicated id was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    pub id: PlanId,
    pub keeper: PathBuf,
    pub shifted: Vec<PathBuf>,
    pub rule: KeeperRule,
}

/// The part a plan plays in conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Its id is not duplicated (or it has none).
    Unique,
    /// Keeps a duplicated id.
    Keeper,
    /// Moves to a fresh id.
    Shifted,
}

pub(crate) struct Conflicts {
    pub resolutions: Vec<ConflictResolution>,
    pub roles: Vec<Role>,
}

/// Pick one keeper for every id carried by more than one plan.
pub(crate) fn choose_keepers(
    index: &Index<'_>,
    options: &RenumberOptions,
    tasks_dir: &Path,
) -> Conflicts {
    let keep = keep_candidates(options, tasks_dir);
    let mut roles = vec![Role::Unique; index.entries.len()];
    let mut resolutions = Vec::new();

    for (&id, members) in &index.by_id {
        if members.len() < 2 {
            continue;
        }

        let (keeper, rule) = pick_keeper(index, members, &keep, options.changed_files.as_ref());
        roles[keeper] = Role::Keeper;
        let mut shifted = Vec::new();
        for &m in members {
            if m != keeper {
                roles[m] = Role::Shifted;
                shifted.push(index.path(m).to_path_buf());
            }
        }

        tracing::info!(
            plan_id = id,
            keeper = %index.path(keeper).display(),
            shifted = shifted.len(),
            rule = %rule,
            "resolved duplicate id"
        );
        resolutions.push(ConflictResolution {
            id,
            keeper: index.path(keeper).to_path_buf(),
            shifted,
            rule,
        });
    }

    Conflicts { resolutions, roles }
}

fn pick_keeper(
    index: &Index<'_>,
    members: &[usize],
    keep: &[PathBuf],
    changed: Option<&HashSet<PathBuf>>,
) -> (usize, KeeperRule) {
    let kept: Vec<usize> = members
        .iter()
        .copied()
        .filter(|&m| keep.iter().any(|k| same_file(k, index.path(m))))
        .collect();
    if let Some(m) = earliest_created(index, &kept) {
        return (m, KeeperRule::KeepList);
    }

    if let Some(changed) = changed {
        let unchanged: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&m| !changed.iter().any(|c| same_file(c, index.path(m))))
            .collect();
        // When every member changed on the branch, fall through to timestamps.
        if unchanged.len() < members.len() {
            if let Some(m) = earliest_created(index, &unchanged) {
                return (m, KeeperRule::UnchangedOnBranch);
            }
        }
    }

    let m = earliest_created(index, members).unwrap_or(members[0]);
    (m, KeeperRule::EarliestCreated)
}

/// Earliest `created_at` (missing last), then path.
fn earliest_created(index: &Index<'_>, members: &[usize]) -> Option<usize> {
    members.iter().copied().min_by(|&a, &b| {
        let ca = index.entries[a].plan.created_at;
        let cb = index.entries[b].plan.created_at;
        let by_time = match (ca, cb) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_time.then_with(|| index.path(a).cmp(index.path(b)))
    })
}

/// Every path a keep-list entry could mean.
fn keep_candidates(options: &RenumberOptions, tasks_dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for path in &options.keep {
        if path.is_absolute() {
            out.push(path.clone());
            continue;
        }
        if let Some(ref cwd) = options.cwd {
            out.push(cwd.join(path));
        }
        out.push(tasks_dir.join(path));
    }
    out
}

pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
