//! `plank renumber`: resolve duplicate ids and disordered families.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};

use plank_core::renumber::{RenumberOptions, apply_renumbering, plan_renumbering};
use plank_core::vcs::Vcs;

use crate::context::AppContext;

pub fn run_renumber(ctx: &mut AppContext, dry_run: bool, keep: Vec<PathBuf>) -> Result<()> {
    let options = RenumberOptions {
        keep,
        cwd: Some(ctx.cwd.clone()),
        changed_files: branch_changes(ctx),
    };

    let set = ctx.store.load()?;
    let plan = plan_renumbering(set, &options).context("failed to compute renumbering")?;
    print!("{plan}");

    if plan.is_empty() || dry_run {
        if dry_run && !plan.is_empty() {
            println!("Dry run: no files written.");
        }
        return Ok(());
    }

    let report = apply_renumbering(&mut ctx.store, &plan).context("failed to apply renumbering")?;
    for (from, to) in &report.renamed {
        println!("Renamed {} -> {}", from.display(), to.display());
    }
    for (from, to) in &report.skipped_renames {
        eprintln!(
            "warning: kept {} because {} already exists",
            from.display(),
            to.display()
        );
    }
    println!("Updated {} file(s).", report.written.len());
    Ok(())
}

/// Plan files changed on the current branch, when it is not trunk. Any
/// git failure means no branch information.
fn branch_changes(ctx: &AppContext) -> Option<HashSet<PathBuf>> {
    let root = ctx.config.repo_root.as_deref()?;
    let trunk = match ctx.vcs.trunk_branch(root) {
        Ok(trunk) => trunk,
        Err(e) => {
            tracing::debug!(error = %e, "no trunk branch, skipping branch detection");
            return None;
        }
    };
    let current = ctx.vcs.current_branch(root).ok().flatten()?;
    if current == trunk {
        return None;
    }
    match ctx.vcs.changed_files_vs_trunk(root, &trunk) {
        Ok(files) => {
            tracing::debug!(branch = %current, changed = files.len(), "branch changes vs trunk");
            Some(files.into_iter().map(|f| root.join(f)).collect())
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not list branch changes");
            None
        }
    }
}
