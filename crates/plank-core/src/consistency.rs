//! Structural consistency checks over a plan set.
//!
//! The store keeps the parent/child link bidirectional: when plan B names A
//! as its parent, A lists B among its dependencies. Hand edits and merges
//! break that; [`repair_back_references`] restores it. Duplicate ids are
//! reported here but fixed by renumbering.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use plank_store::{PlanEdit, PlanId, PlanSet, PlanStore, StoreError};

/// A child whose parent does not list it as a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBackReference {
    pub parent_id: PlanId,
    pub parent_path: PathBuf,
    pub child_id: PlanId,
}

/// Findings of a consistency scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub missing_back_references: Vec<MissingBackReference>,
    /// `(child, parent)` pairs whose parent id does not exist.
    pub dangling_parents: Vec<(PlanId, PlanId)>,
    /// `(plan, dependency)` pairs whose dependency id does not exist.
    pub dangling_dependencies: Vec<(PlanId, PlanId)>,
    /// Ids used by more than one file.
    pub duplicate_ids: Vec<(PlanId, Vec<PathBuf>)>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.missing_back_references.is_empty()
            && self.dangling_parents.is_empty()
            && self.dangling_dependencies.is_empty()
            && self.duplicate_ids.is_empty()
    }
}

/// Outcome of [`repair_back_references`].
#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    /// Number of missing back-references added (or that would be added).
    pub fixed: usize,
    /// Parent files that were (or would be) rewritten.
    pub updated_files: Vec<PathBuf>,
    pub dry_run: bool,
    pub report: ConsistencyReport,
}

/// Scan a plan set for every inconsistency this module knows about.
pub fn check_consistency(set: &PlanSet) -> ConsistencyReport {
    let mut report = ConsistencyReport {
        missing_back_references: find_missing_back_references(set),
        duplicate_ids: find_duplicate_ids(set),
        ..ConsistencyReport::default()
    };

    for entry in set.iter() {
        let Some(id) = entry.plan.id else { continue };
        if let Some(parent) = entry.plan.parent {
            if set.get(parent).is_none() {
                report.dangling_parents.push((id, parent));
            }
        }
        for &dep in &entry.plan.dependencies {
            if set.get(dep).is_none() {
                report.dangling_dependencies.push((id, dep));
            }
        }
    }

    report
}

/// Every child whose parent exists but does not list the child in its
/// `dependencies`.
///
/// Links involving a duplicated id are skipped: which file is meant is
/// unknown until the set is renumbered.
pub fn find_missing_back_references(set: &PlanSet) -> Vec<MissingBackReference> {
    let mut missing = Vec::new();
    for entry in set.iter() {
        let (Some(child_id), Some(parent_id)) = (entry.plan.id, entry.plan.parent) else {
            continue;
        };
        let parents = set.all_with_id(parent_id);
        let [parent] = parents.as_slice() else {
            continue;
        };
        if set.all_with_id(child_id).len() > 1 {
            continue;
        }
        if !parent.plan.dependencies.contains(&child_id) {
            missing.push(MissingBackReference {
                parent_id,
                parent_path: parent.path.clone(),
                child_id,
            });
        }
    }
    missing
}

/// Ids carried by more than one plan file, with the files involved.
pub fn find_duplicate_ids(set: &PlanSet) -> Vec<(PlanId, Vec<PathBuf>)> {
    let mut by_id: BTreeMap<PlanId, Vec<PathBuf>> = BTreeMap::new();
    for (id, path) in set.ids_with_paths() {
        by_id.entry(id).or_default().push(path.to_path_buf());
    }
    by_id.into_iter().filter(|(_, paths)| paths.len() > 1).collect()
}

/// Add every missing parent-to-child back-reference, one write per parent.
///
/// Dangling references are logged and left alone. With `dry_run` nothing is
/// written but the report is the same.
pub fn repair_back_references(
    store: &mut PlanStore,
    dry_run: bool,
) -> Result<RepairReport, StoreError> {
    let set = store.load()?;
    let report = check_consistency(set);

    for (child, parent) in &report.dangling_parents {
        tracing::warn!(plan_id = child, parent_id = parent, "parent does not exist");
    }
    for (plan, dep) in &report.dangling_dependencies {
        tracing::warn!(plan_id = plan, dependency = dep, "dependency does not exist");
    }
    for (id, paths) in &report.duplicate_ids {
        tracing::warn!(plan_id = id, files = paths.len(), "duplicate id, links left for renumbering");
    }

    let mut by_parent: BTreeMap<PathBuf, (Vec<PlanId>, Vec<PlanId>)> = BTreeMap::new();
    for missing in &report.missing_back_references {
        let slot = by_parent.entry(missing.parent_path.clone()).or_insert_with(|| {
            let existing = set
                .get_by_path(&missing.parent_path)
                .map(|e| e.plan.dependencies.clone())
                .unwrap_or_default();
            (existing, Vec::new())
        });
        if !slot.0.contains(&missing.child_id) {
            slot.0.push(missing.child_id);
            slot.1.push(missing.child_id);
        }
    }

    let fixed = by_parent.values().map(|(_, added)| added.len()).sum();
    let updated_files: Vec<PathBuf> = by_parent.keys().cloned().collect();

    if !dry_run {
        let now = Utc::now();
        for (path, (dependencies, added)) in by_parent {
            let edit = PlanEdit {
                dependencies: Some(dependencies),
                updated_at: Some(now),
                ..PlanEdit::default()
            };
            store.edit(&path, &edit)?;
            tracing::info!(path = %path.display(), added = ?added, "added missing child references");
        }
    }

    Ok(RepairReport {
        fixed,
        updated_files,
        dry_run,
        report,
    })
}
