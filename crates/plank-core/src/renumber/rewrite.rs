//! Apply a computed [`RenumberPlan`] to the plan files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use plank_store::fsutil::{replace_and_rename, write_atomic};
use plank_store::plan_file::edit_plan_file;
use plank_store::{PlanEdit, PlanStore};

use super::{PlanChange, RenumberError, RenumberPlan};

/// What [`apply_renumbering`] did.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Files rewritten in place.
    pub written: Vec<PathBuf>,
    /// `(from, to)` for each renamed file.
    pub renamed: Vec<(PathBuf, PathBuf)>,
    /// Renames skipped because the target already existed; the file was
    /// still rewritten under its old name.
    pub skipped_renames: Vec<(PathBuf, PathBuf)>,
}

/// Rewrite every changed plan file.
///
/// All documents are edited in memory first, so a malformed file aborts
/// before anything is written. Each file is then replaced atomically.
pub fn apply_renumbering(
    store: &mut PlanStore,
    plan: &RenumberPlan,
) -> Result<ApplyReport, RenumberError> {
    let now = Utc::now();
    let mut pending: Vec<(&PlanChange, String)> = Vec::with_capacity(plan.changes.len());

    for change in &plan.changes {
        let content =
            std::fs::read_to_string(&change.path).map_err(|source| RenumberError::Io {
                path: change.path.clone(),
                source,
            })?;
        let edit = PlanEdit {
            id: if change.id_changed() { change.new_id } else { None },
            uuid: None,
            parent: change.parent,
            dependencies: change.dependencies.clone(),
            status: None,
            updated_at: Some(now),
        };
        let updated = edit_plan_file(&content, &edit).map_err(|source| RenumberError::Rewrite {
            path: change.path.clone(),
            source,
        })?;
        pending.push((change, updated));
    }

    let mut report = ApplyReport::default();

    // A rename may target a file another change is about to move away, so
    // defer those until their target has been vacated.
    loop {
        let sources: HashSet<PathBuf> = pending.iter().map(|(c, _)| c.path.clone()).collect();
        let before = pending.len();
        let mut deferred = Vec::new();

        for (change, content) in pending {
            let blocked = change
                .new_path
                .as_ref()
                .is_some_and(|target| target != &change.path && sources.contains(target));
            if blocked {
                deferred.push((change, content));
            } else {
                write_change(change, &content, &mut report)?;
            }
        }

        if deferred.is_empty() {
            break;
        }
        if deferred.len() == before {
            // Rename cycle (e.g. two files swapping ids). Every target is
            // another pending source whose new content is already in
            // memory, so write all targets and then drop orphaned sources.
            write_rename_cycle(&deferred, &mut report)?;
            break;
        }
        pending = deferred;
    }

    store.invalidate();
    tracing::info!(
        written = report.written.len(),
        renamed = report.renamed.len(),
        skipped = report.skipped_renames.len(),
        "applied renumbering"
    );
    Ok(report)
}

fn write_change(
    change: &PlanChange,
    content: &str,
    report: &mut ApplyReport,
) -> Result<(), RenumberError> {
    match change.new_path {
        Some(ref target) if target.exists() => {
            tracing::warn!(
                from = %change.path.display(),
                to = %target.display(),
                "rename target exists, keeping old file name"
            );
            write_atomic(&change.path, content.as_bytes()).map_err(io_err(&change.path))?;
            report.written.push(change.path.clone());
            report
                .skipped_renames
                .push((change.path.clone(), target.clone()));
        }
        Some(ref target) => {
            replace_and_rename(&change.path, target, content.as_bytes())
                .map_err(io_err(target))?;
            tracing::debug!(from = %change.path.display(), to = %target.display(), "renamed plan file");
            report.written.push(target.clone());
            report.renamed.push((change.path.clone(), target.clone()));
        }
        None => {
            write_atomic(&change.path, content.as_bytes()).map_err(io_err(&change.path))?;
            report.written.push(change.path.clone());
        }
    }
    Ok(())
}

fn write_rename_cycle(
    cycle: &[(&PlanChange, String)],
    report: &mut ApplyReport,
) -> Result<(), RenumberError> {
    let targets: HashSet<&PathBuf> = cycle.iter().filter_map(|(c, _)| c.new_path.as_ref()).collect();
    for (change, content) in cycle {
        let target = change.new_path.as_ref().unwrap_or(&change.path);
        write_atomic(target, content.as_bytes()).map_err(io_err(target))?;
        report.written.push(target.clone());
        if target != &change.path {
            report.renamed.push((change.path.clone(), target.clone()));
        }
    }
    for (change, _) in cycle {
        if change.new_path.is_some() && !targets.contains(&change.path) {
            std::fs::remove_file(&change.path).map_err(io_err(&change.path))?;
        }
    }
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RenumberError + use<> {
    let path = path.to_path_buf();
    move |source| RenumberError::Io { path, source }
}
