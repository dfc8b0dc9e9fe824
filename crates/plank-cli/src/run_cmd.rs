//! `plank run <id> -- <command...>`: run an agent command in a locked,
//! claimed workspace.
//!
//! The workspace lock is a process lock held for the lifetime of the agent.
//! It is released when the agent exits, when the user presses Ctrl+C, or by
//! the lock's `Drop` if anything in between fails.

use std::path::Path;

use anyhow::{Context, Result, bail};

use plank_core::lifecycle::claim_plan;
use plank_core::set_plan_status;
use plank_core::workspace::{LockRequest, WorkspaceLock};
use plank_store::PlanStatus;

use crate::context::AppContext;
use crate::resolve::resolve_plan_id;

/// Environment variables handed to the agent.
pub const PLAN_ID_ENV: &str = "PLANK_PLAN_ID";
pub const PLAN_FILE_ENV: &str = "PLANK_PLAN_FILE";

pub async fn run_agent(
    ctx: &mut AppContext,
    input: &str,
    workspace: Option<&Path>,
    command: &[String],
) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given; pass it after `--`");
    };
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let workspace = ctx.workspace_path(workspace);

    let lock = WorkspaceLock::acquire(
        &workspace,
        &LockRequest::process(command.join(" ")),
        ctx.config.stale_after,
    )
    .with_context(|| format!("failed to lock {}", workspace.display()))?;

    let user = ctx.config.user.clone();
    let claim = ctx
        .with_claims(|store, claims| claim_plan(store, claims, id, &workspace, user.as_deref()))
        .with_context(|| format!("failed to claim plan {id}"))?;
    for warning in &claim.outcome.warnings {
        eprintln!("warning: {warning}");
    }

    let (status, plan_file) = {
        let set = ctx.store.load()?;
        let entry = set.get_entry(id).with_context(|| format!("plan {id} not found"))?;
        (entry.plan.status, entry.path.clone())
    };
    if status == PlanStatus::Pending {
        let change = set_plan_status(&mut ctx.store, id, PlanStatus::InProgress, false, None)?;
        tracing::info!(plan_id = id, previous = %change.previous, "plan started");
    }

    eprintln!("Running `{}` in {}", command.join(" "), workspace.display());
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .current_dir(&workspace)
        .env(PLAN_ID_ENV, id.to_string())
        .env(PLAN_FILE_ENV, &plan_file)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start `{program}`"))?;

    let outcome = tokio::select! {
        status = child.wait() => Some(status.context("failed to wait for agent command")?),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted, stopping agent...");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill agent command");
            }
            None
        }
    };

    if let Err(e) = lock.release() {
        tracing::warn!(error = %e, "failed to release workspace lock");
    }

    match outcome {
        Some(status) if status.success() => {
            eprintln!("Agent finished. Mark the plan complete with `plank done {id}`.");
            Ok(())
        }
        Some(status) => bail!("agent command exited with {status}"),
        None => bail!("interrupted"),
    }
}
