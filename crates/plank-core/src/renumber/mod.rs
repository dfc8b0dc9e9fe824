//! Identity reconciliation: resolve duplicate plan ids and keep ids ordered
//! along the plan hierarchy.
//!
//! Two plan sets authored independently (typically on two branches) both
//! number from 1. After they meet, the same id names several files. The
//! engine works in two phases:
//!
//! 1. [`plan_renumbering`] is pure. It picks a keeper for each duplicated
//!    id, decides which file every `parent`/`dependencies` value points at,
//!    moves the non-keepers above the current maximum id, and then reorders
//!    every family whose child ids are lower than their parents'.
//! 2. [`apply_renumbering`] rewrites the affected files in one pass using the
//!    complete mapping and renames files whose names embed the old id.
//!
//! A dry run is simply phase 1 without phase 2.

mod conflicts;
mod family;
mod references;
mod rewrite;
mod topo;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use plank_store::plan_file::rename_for_id;
use plank_store::{PlanFileError, PlanId, PlanSet, StoreError, StoredPlan};
use thiserror::Error;

pub use conflicts::{ConflictResolution, KeeperRule};
pub use rewrite::{ApplyReport, apply_renumbering};

use conflicts::Role;
use references::{Links, Target};

/// Errors from renumbering.
#[derive(Debug, Error)]
pub enum RenumberError {
    /// The combined parent/dependency graph of a family has a cycle.
    #[error("circular dependency among plans {}", join_ids(plan_ids))]
    CircularDependency { plan_ids: Vec<PlanId> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to rewrite {}: {source}", path.display())]
    Rewrite {
        path: PathBuf,
        #[source]
        source: PlanFileError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn join_ids(ids: &[PlanId]) -> String {
    ids.iter()
        .map(PlanId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inputs that steer keeper selection.
#[derive(Debug, Clone, Default)]
pub struct RenumberOptions {
    /// Plan files that must keep their id. Relative paths are tried
    /// against `cwd` and then the tasks directory.
    pub keep: Vec<PathBuf>,
    /// Working directory for resolving relative `keep` paths.
    pub cwd: Option<PathBuf>,
    /// Absolute paths of files changed on the current branch relative to
    /// trunk. `None` on trunk or when the information is unavailable.
    pub changed_files: Option<HashSet<PathBuf>>,
}

/// One file's planned rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanChange {
    pub path: PathBuf,
    /// Rename target when the file name embeds the old id.
    pub new_path: Option<PathBuf>,
    pub old_id: Option<PlanId>,
    pub new_id: Option<PlanId>,
    /// New `parent` value, when it changes.
    pub parent: Option<Option<PlanId>>,
    /// New `dependencies` value, when it changes.
    pub dependencies: Option<Vec<PlanId>>,
}

impl PlanChange {
    pub fn id_changed(&self) -> bool {
        self.old_id != self.new_id
    }
}

/// The complete outcome of planning, computed before any write.
#[derive(Debug, Clone, Default)]
pub struct RenumberPlan {
    pub conflicts: Vec<ConflictResolution>,
    /// Root ids (before reordering) of families whose ids were reordered.
    pub reordered_families: Vec<PlanId>,
    pub changes: Vec<PlanChange>,
}

impl RenumberPlan {
    /// Whether applying the plan would write nothing.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// `(path, old, new)` for each plan whose id changes.
    pub fn id_mapping(&self) -> Vec<(&Path, PlanId, PlanId)> {
        self.changes
            .iter()
            .filter_map(|c| match (c.old_id, c.new_id) {
                (Some(old), Some(new)) if old != new => Some((c.path.as_path(), old, new)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for RenumberPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No renumbering needed.");
        }
        for conflict in &self.conflicts {
            writeln!(
                f,
                "ID {} is used by {} files; keeping {} ({})",
                conflict.id,
                conflict.shifted.len() + 1,
                conflict.keeper.display(),
                conflict.rule
            )?;
        }
        for (path, old, new) in self.id_mapping() {
            writeln!(f, "  {old} -> {new}  {}", path.display())?;
        }
        let reference_only = self.changes.iter().filter(|c| !c.id_changed()).count();
        if reference_only > 0 {
            writeln!(f, "  {reference_only} file(s) with updated references only")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

/// Positional view of a plan set: every entry gets an index, and ids map to
/// the (possibly several) entries that carry them.
pub(crate) struct Index<'a> {
    pub entries: Vec<&'a StoredPlan>,
    pub by_id: BTreeMap<PlanId, Vec<usize>>,
}

impl<'a> Index<'a> {
    fn new(set: &'a PlanSet) -> Self {
        let entries: Vec<&StoredPlan> = set.iter().collect();
        let mut by_id: BTreeMap<PlanId, Vec<usize>> = BTreeMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(id) = entry.plan.id {
                by_id.entry(id).or_default().push(i);
            }
        }
        Self { entries, by_id }
    }

    pub fn path(&self, i: usize) -> &Path {
        &self.entries[i].path
    }

    pub fn id(&self, i: usize) -> Option<PlanId> {
        self.entries[i].plan.id
    }

    /// Indices of numbered plans.
    pub fn numbered(&self) -> Vec<usize> {
        (0..self.entries.len())
            .filter(|&i| self.entries[i].plan.id.is_some())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Compute the full renumbering for `set` without touching the disk.
pub fn plan_renumbering(
    set: &PlanSet,
    options: &RenumberOptions,
) -> Result<RenumberPlan, RenumberError> {
    let index = Index::new(set);
    let conflicts = conflicts::choose_keepers(&index, options, set.dir());
    let links = references::resolve(&index, &conflicts.roles, options.changed_files.as_ref());

    let mut current: Vec<Option<PlanId>> = index.entries.iter().map(|e| e.plan.id).collect();

    // Move every non-keeper above the current maximum, in dependency order.
    let shifted: Vec<usize> = (0..index.entries.len())
        .filter(|&i| conflicts.roles[i] == Role::Shifted)
        .collect();
    if !shifted.is_empty() {
        let shifted_set: HashSet<usize> = shifted.iter().copied().collect();
        let edges = precedence_edges(&links, &shifted_set);
        let order = topo::sort(&shifted, &edges, |i| (index.id(i), index.path(i).to_path_buf()))
            .map_err(|stuck| cycle_error(&index, &stuck))?;
        let mut next = set.max_id() + 1;
        for i in order {
            tracing::debug!(
                path = %index.path(i).display(),
                old = ?index.id(i),
                new = next,
                "shifting conflicting plan"
            );
            current[i] = Some(next);
            next += 1;
        }
    }

    // Reorder families whose ids do not increase down the hierarchy.
    let mut reordered_families = Vec::new();
    for members in family::families(&index, &links) {
        if !family::is_disordered(&members, &links, &current) {
            continue;
        }
        let root_id = current[members[0]].unwrap_or_default();
        let assignment = family::reassign(&index, &links, &members, &current)?;
        for (i, id) in assignment {
            current[i] = Some(id);
        }
        tracing::debug!(root_id, members = members.len(), "reordered family");
        reordered_families.push(root_id);
    }

    let changes = collect_changes(&index, &links, &current);
    tracing::info!(
        conflicts = conflicts.resolutions.len(),
        families = reordered_families.len(),
        changes = changes.len(),
        "computed renumbering"
    );

    Ok(RenumberPlan {
        conflicts: conflicts.resolutions,
        reordered_families,
        changes,
    })
}

/// Parent-before-child and dependency-before-dependent edges among
/// `members`. A plan's dependency on one of its own descendants is the
/// container back-reference and does not order anything.
pub(crate) fn precedence_edges(links: &Links, members: &HashSet<usize>) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    let mut sorted: Vec<usize> = members.iter().copied().collect();
    sorted.sort_unstable();
    for m in sorted {
        if let Some(Target::Plan(p)) = links.parent[m] {
            if members.contains(&p) {
                edges.push((p, m));
            }
        }
        for target in &links.dependencies[m] {
            let Target::Plan(d) = *target else { continue };
            if d == m || !members.contains(&d) || links.is_descendant(d, m) {
                continue;
            }
            edges.push((d, m));
        }
    }
    edges
}

pub(crate) fn cycle_error(index: &Index<'_>, stuck: &[usize]) -> RenumberError {
    let mut plan_ids: Vec<PlanId> = stuck.iter().filter_map(|&i| index.id(i)).collect();
    plan_ids.sort_unstable();
    plan_ids.dedup();
    RenumberError::CircularDependency { plan_ids }
}

fn collect_changes(index: &Index<'_>, links: &Links, current: &[Option<PlanId>]) -> Vec<PlanChange> {
    let resolve = |target: &Target| match *target {
        Target::Plan(i) => current[i],
        Target::Dangling(v) => Some(v),
    };

    let mut changes = Vec::new();
    for (i, entry) in index.entries.iter().enumerate() {
        let plan = &entry.plan;

        let new_parent = links.parent[i].as_ref().and_then(resolve);
        let mut new_deps: Vec<PlanId> = Vec::with_capacity(plan.dependencies.len());
        for target in &links.dependencies[i] {
            if let Some(id) = resolve(target) {
                if !new_deps.contains(&id) {
                    new_deps.push(id);
                }
            }
        }

        let parent_changed = new_parent != plan.parent;
        let deps_changed = new_deps != plan.dependencies;
        let id_changed = current[i] != plan.id;
        if !parent_changed && !deps_changed && !id_changed {
            continue;
        }

        let new_path = match (plan.id, current[i]) {
            (Some(old), Some(new)) if old != new => entry
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|name| rename_for_id(name, old, new))
                .map(|name| entry.path.with_file_name(name)),
            _ => None,
        };

        changes.push(PlanChange {
            path: entry.path.clone(),
            new_path,
            old_id: plan.id,
            new_id: current[i],
            parent: parent_changed.then_some(new_parent),
            dependencies: deps_changed.then_some(new_deps),
        });
    }
    changes
}
