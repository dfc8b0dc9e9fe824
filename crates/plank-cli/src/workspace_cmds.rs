//! CLI handlers for `plank workspace` subcommands.
//!
//! Implements:
//! - `plank workspace list`            -- registered workspaces with lock state
//! - `plank workspace add|remove`      -- registry maintenance
//! - `plank workspace lock|unlock`     -- persistent locks
//! - `plank workspace reuse <id>`      -- pick or create a workspace for a plan

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use plank_core::lifecycle::claim_plan;
use plank_core::vcs::Vcs;
use plank_core::workspace::{
    LockRequest, LockStatus, WorkspaceEntry, WorkspaceLock, checkout_from_trunk,
    create_workspace, force_release, lock_status, release_lock, repository_id, select_workspace,
};
use plank_store::PlanId;

use crate::WorkspaceCommands;
use crate::context::AppContext;
use crate::resolve::resolve_plan_id;

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

pub fn run_workspace_command(ctx: &mut AppContext, command: WorkspaceCommands) -> Result<()> {
    match command {
        WorkspaceCommands::List { all } => cmd_list(ctx, all),
        WorkspaceCommands::Add { path } => cmd_add(ctx, &path),
        WorkspaceCommands::Remove { path } => cmd_remove(ctx, &path),
        WorkspaceCommands::Lock { path } => cmd_lock(ctx, path.as_deref()),
        WorkspaceCommands::Unlock { path, force } => cmd_unlock(ctx, path.as_deref(), force),
        WorkspaceCommands::Reuse { plan, create } => cmd_reuse(ctx, &plan, create),
    }
}

/// Branch name for work on a plan, e.g. `plank/3-add-auth`.
pub fn plan_branch_name(id: PlanId, title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(40).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        format!("plank/{id}")
    } else {
        format!("plank/{id}-{slug}")
    }
}

fn require_user(ctx: &AppContext) -> Result<String> {
    ctx.config
        .user
        .clone()
        .context("no user configured; pass --user or set PLANK_USER")
}

// -----------------------------------------------------------------------
// plank workspace list
// -----------------------------------------------------------------------

fn cmd_list(ctx: &mut AppContext, all: bool) -> Result<()> {
    let repo = ctx.repository_id();
    let entries = ctx
        .registry
        .list(if all { None } else { Some(&repo) })
        .context("failed to read workspace registry")?;

    if entries.is_empty() {
        println!("No workspaces registered.");
        return Ok(());
    }

    for entry in entries {
        let lock = match lock_status(&entry.path, ctx.config.stale_after) {
            Ok(LockStatus::Unlocked) => "unlocked".to_string(),
            Ok(LockStatus::Held(info)) => format!("locked: {}", info.describe()),
            Ok(LockStatus::Stale(info)) => format!("stale lock: {}", info.describe()),
            Err(e) => format!("lock unreadable: {e}"),
        };
        let missing = if entry.path.exists() { "" } else { " (missing)" };
        println!("{}{missing}", entry.path.display());
        println!("  Branch:    {}", entry.branch.as_deref().unwrap_or("-"));
        println!("  Lock:      {lock}");
        if let Some(uuid) = entry.plan_uuid {
            println!("  Plan:      {uuid}");
        }
        println!("  Last used: {}", entry.last_used_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if all {
            println!("  Repository: {}", entry.repository_id);
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank workspace add / remove
// -----------------------------------------------------------------------

fn cmd_add(ctx: &mut AppContext, path: &Path) -> Result<()> {
    let path = absolute(ctx, path);
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let repo = repository_id(&ctx.vcs, &path)
        .with_context(|| format!("{} is not a git checkout", path.display()))?;
    let mut entry = WorkspaceEntry::new(path.clone(), &repo);
    entry.branch = ctx.vcs.current_branch(&path).ok().flatten();
    ctx.registry.upsert(entry)?;
    println!("Registered workspace {}", path.display());
    Ok(())
}

fn cmd_remove(ctx: &mut AppContext, path: &Path) -> Result<()> {
    let path = absolute(ctx, path);
    if ctx.registry.remove(&path)? {
        println!("Removed workspace {}", path.display());
    } else {
        println!("{} is not a registered workspace", path.display());
    }
    Ok(())
}

/// Registry keys are canonical when the directory exists.
fn absolute(ctx: &AppContext, path: &Path) -> PathBuf {
    let joined = ctx.workspace_path(Some(path));
    joined.canonicalize().unwrap_or(joined)
}

// -----------------------------------------------------------------------
// plank workspace lock / unlock
// -----------------------------------------------------------------------

fn cmd_lock(ctx: &mut AppContext, path: Option<&Path>) -> Result<()> {
    let workspace = ctx.workspace_path(path);
    let user = require_user(ctx)?;
    let lock = WorkspaceLock::acquire(
        &workspace,
        &LockRequest::persistent(user),
        ctx.config.stale_after,
    )
    .with_context(|| format!("failed to lock {}", workspace.display()))?;
    let info = lock.keep();
    println!("Locked {} ({})", workspace.display(), info.describe());
    Ok(())
}

fn cmd_unlock(ctx: &mut AppContext, path: Option<&Path>, force: bool) -> Result<()> {
    let workspace = ctx.workspace_path(path);
    if force {
        match force_release(&workspace)? {
            Some(info) => println!("Removed lock held by {}", info.describe()),
            None => println!("Removed lock on {}", workspace.display()),
        }
        return Ok(());
    }

    let released = release_lock(&workspace, ctx.config.user.as_deref())
        .with_context(|| format!("failed to unlock {}", workspace.display()))?;
    if released {
        println!("Unlocked {}", workspace.display());
    } else {
        println!("{} is not locked", workspace.display());
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank workspace reuse
// -----------------------------------------------------------------------

fn cmd_reuse(ctx: &mut AppContext, input: &str, create: bool) -> Result<()> {
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let title = ctx
        .store
        .load()?
        .get(id)
        .map(|p| p.title.clone())
        .unwrap_or_default();
    let branch = plan_branch_name(id, &title);
    let user = require_user(ctx)?;
    let request = LockRequest::persistent(user.clone());
    let repo = ctx.repository_id();

    let (workspace, lock, previous_branch) = if create {
        let Some(ref repo_root) = ctx.config.repo_root else {
            bail!("`--create` must be run inside a git repository");
        };
        let name = format!("{}-{id}-{}", repo.storage_key(), short_suffix());
        let path = create_workspace(
            &ctx.vcs,
            repo_root,
            &ctx.config.worktree_base,
            &name,
            &branch,
            &ctx.registry,
            &repo,
        )?;
        let lock = WorkspaceLock::acquire(&path, &request, ctx.config.stale_after)
            .with_context(|| format!("failed to lock {}", path.display()))?;
        (path, lock, None)
    } else {
        let candidates: Vec<PathBuf> = ctx
            .registry
            .list(Some(&repo))?
            .into_iter()
            .map(|e| e.path)
            .collect();
        let reused = select_workspace(
            &ctx.vcs,
            &candidates,
            &request,
            ctx.config.stale_after,
            checkout_from_trunk(&ctx.vcs, &branch),
        )
        .context("no reusable workspace; try `plank workspace reuse --create`")?;
        for skipped in &reused.skipped {
            eprintln!("skipped {}: {}", skipped.path.display(), skipped.outcome);
        }
        (reused.path, reused.lock, reused.previous_branch)
    };

    // The lock stays held only once the plan is claimed for this workspace.
    if let Err(e) = claim_for_workspace(ctx, id, &workspace, &branch, &user) {
        if let Some(previous) = previous_branch {
            if let Err(err) = ctx.vcs.checkout(&workspace, &previous) {
                tracing::warn!(error = %err, branch = %previous, "failed to restore branch");
            }
        }
        if let Err(err) = lock.release() {
            tracing::warn!(error = %err, "failed to release workspace lock");
        }
        return Err(e);
    }
    lock.keep();

    eprintln!("Workspace ready on branch {branch}");
    println!("{}", workspace.display());
    Ok(())
}

fn claim_for_workspace(
    ctx: &mut AppContext,
    id: PlanId,
    workspace: &Path,
    branch: &str,
    user: &str,
) -> Result<()> {
    let claim = ctx
        .with_claims(|store, claims| claim_plan(store, claims, id, workspace, Some(user)))
        .with_context(|| format!("failed to claim plan {id}"))?;
    for warning in &claim.outcome.warnings {
        eprintln!("warning: {warning}");
    }
    ctx.registry
        .touch(workspace, Some(branch.to_string()), Some(claim.uuid))?;
    Ok(())
}

fn short_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
