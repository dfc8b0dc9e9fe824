//! CLI handlers for `plank claim` and `plank release`.

use std::path::Path;

use anyhow::{Context, Result};

use plank_core::lifecycle::{claim_plan, release_plan_claim};

use crate::context::AppContext;
use crate::resolve::resolve_plan_id;

pub fn cmd_claim(ctx: &mut AppContext, input: &str, workspace: Option<&Path>) -> Result<()> {
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let workspace = ctx.workspace_path(workspace);
    let user = ctx.config.user.clone();

    let claim = ctx
        .with_claims(|store, claims| claim_plan(store, claims, id, &workspace, user.as_deref()))
        .with_context(|| format!("failed to claim plan {id}"))?;

    for warning in &claim.outcome.warnings {
        eprintln!("warning: {warning}");
    }
    let outcome = &claim.outcome;
    if outcome.created {
        println!("Claimed plan {id} for {}", workspace.display());
    } else if outcome.added_workspace || outcome.added_user {
        println!("Added {} to the claim on plan {id}", workspace.display());
    } else {
        println!("Plan {id} is already claimed by {}", workspace.display());
    }
    if !outcome.persisted {
        anyhow::bail!("claim on plan {id} was not saved");
    }
    Ok(())
}

pub fn cmd_release(
    ctx: &mut AppContext,
    input: &str,
    workspace: Option<&Path>,
    all: bool,
) -> Result<()> {
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let workspace = if all {
        None
    } else {
        Some(ctx.workspace_path(workspace))
    };
    let user = ctx.config.user.clone();

    let released = ctx
        .with_claims(|store, claims| {
            release_plan_claim(store, claims, id, workspace.as_deref(), user.as_deref())
        })
        .with_context(|| format!("failed to release plan {id}"))?;

    match (released, workspace) {
        (true, Some(ws)) => println!("Released plan {id} for {}", ws.display()),
        (true, None) => println!("Released all claims on plan {id}"),
        (false, _) => println!("Plan {id} has no matching claim"),
    }
    Ok(())
}
