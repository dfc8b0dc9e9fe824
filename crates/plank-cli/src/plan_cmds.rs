//! CLI handlers for plan commands.
//!
//! Implements:
//! - `plank init`                     -- create the tasks dir and config file
//! - `plank add <title>`              -- create a plan file
//! - `plank list` / `plank show <id>` -- inspect plans
//! - `plank ready <id>`               -- next actionable dependency
//! - `plank set-status` / `plank done` -- status changes with claim cleanup
//! - `plank validate`                 -- consistency report and repair

use anyhow::{Context, Result, bail};

use plank_core::consistency::repair_back_references;
use plank_core::ready::find_next_ready_dependency;
use plank_core::set_plan_status;
use plank_store::{NewPlan, PlanStatus, Priority, Task, TaskWork};

use crate::config::{ConfigFile, PathsSection, config_path, load_config, save_config};
use crate::context::AppContext;
use crate::resolve::{resolve_plan_id, resolve_plan_ids};

// -----------------------------------------------------------------------
// plank init
// -----------------------------------------------------------------------

pub fn cmd_init(ctx: &AppContext, force: bool) -> Result<()> {
    let tasks_dir = &ctx.config.tasks_dir;
    std::fs::create_dir_all(tasks_dir)
        .with_context(|| format!("failed to create tasks directory {}", tasks_dir.display()))?;
    println!("Tasks directory: {}", tasks_dir.display());

    let path = config_path();
    if path.exists() && !force {
        println!("Config file:     {} (exists, use --force to overwrite)", path.display());
        return Ok(());
    }

    let mut file = if force {
        ConfigFile::default()
    } else {
        load_config()?
    };
    file.paths = PathsSection {
        tasks_dir: Some(tasks_dir.clone()),
        data_dir: Some(ctx.config.data_dir.clone()),
    };
    if file.user.name.is_none() {
        file.user.name = ctx.config.user.clone();
    }
    save_config(&file)?;
    println!("Config file:     {}", path.display());
    Ok(())
}

// -----------------------------------------------------------------------
// plank add
// -----------------------------------------------------------------------

pub struct AddArgs {
    pub title: String,
    pub goal: String,
    pub details: String,
    pub priority: Option<Priority>,
    pub parent: Option<String>,
    pub depends_on: Vec<String>,
    pub tasks: Vec<String>,
}

pub fn cmd_add(ctx: &mut AppContext, args: AddArgs) -> Result<()> {
    if args.title.trim().is_empty() {
        bail!("plan title must not be empty");
    }
    let parent = match args.parent {
        Some(ref input) => Some(resolve_plan_id(&mut ctx.store, input)?),
        None => None,
    };
    let dependencies = resolve_plan_ids(&mut ctx.store, &args.depends_on)?;

    let created = ctx.store.create(NewPlan {
        title: args.title,
        goal: args.goal,
        details: args.details,
        priority: args.priority,
        parent,
        dependencies,
        tasks: args
            .tasks
            .iter()
            .map(|title| Task::simple(title.as_str(), ""))
            .collect(),
    })?;

    println!("Created {}", created.plan.label());
    println!("  File: {}", created.path.display());
    if let Some(parent) = parent {
        println!("  Parent: {parent}");
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank list
// -----------------------------------------------------------------------

pub fn cmd_list(ctx: &mut AppContext, status: Option<PlanStatus>, all: bool) -> Result<()> {
    let set = ctx.store.load()?;
    let mut plans: Vec<_> = set
        .iter()
        .filter(|e| match status {
            Some(s) => e.plan.status == s,
            None => all || !e.plan.status.is_terminal(),
        })
        .collect();
    plans.sort_by_key(|e| (e.plan.id.is_none(), e.plan.id));

    if plans.is_empty() {
        println!("No plans found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<12} {:<8} {:<7} TITLE",
        "ID", "STATUS", "PRIORITY", "TASKS"
    );
    for entry in plans {
        let plan = &entry.plan;
        let done = plan.tasks.iter().filter(|t| t.is_complete()).count();
        println!(
            "{:<6} {:<12} {:<8} {:<7} {}",
            plan.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            plan.status.to_string(),
            plan.priority.map(|p| p.to_string()).unwrap_or_default(),
            format!("{done}/{}", plan.tasks.len()),
            plan.title
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank show
// -----------------------------------------------------------------------

pub fn cmd_show(ctx: &mut AppContext, input: &str) -> Result<()> {
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let set = ctx.store.load()?;
    let Some(entry) = set.get_entry(id) else {
        bail!("plan {id} not found");
    };
    let plan = &entry.plan;

    println!("Plan {id}: {}", plan.title);
    println!("  File:       {}", entry.path.display());
    if let Some(uuid) = plan.uuid {
        println!("  UUID:       {uuid}");
    }
    println!("  Status:     {}", plan.status);
    if let Some(priority) = plan.priority {
        println!("  Priority:   {priority}");
    }
    if let Some(parent) = plan.parent {
        println!("  Parent:     {parent}");
    }
    if !plan.dependencies.is_empty() {
        let deps: Vec<String> = plan.dependencies.iter().map(|d| d.to_string()).collect();
        println!("  Depends on: {}", deps.join(", "));
    }
    if !plan.goal.is_empty() {
        println!();
        println!("Goal: {}", plan.goal);
    }
    if !plan.details.is_empty() {
        println!();
        println!("{}", plan.details);
    }

    if !plan.tasks.is_empty() {
        println!();
        println!("Tasks:");
        for (i, task) in plan.tasks.iter().enumerate() {
            let mark = if task.is_complete() { "x" } else { " " };
            println!("  [{mark}] {}. {}", i + 1, task.title);
            if let TaskWork::Complex { ref steps } = task.work {
                for step in steps {
                    let mark = if step.done { "x" } else { " " };
                    println!("        [{mark}] {}", step.prompt);
                }
            }
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank ready
// -----------------------------------------------------------------------

pub fn cmd_ready(ctx: &mut AppContext, input: &str) -> Result<()> {
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let set = ctx.store.load()?;
    let next = find_next_ready_dependency(set, id)?;

    match next.plan {
        Some(plan) => {
            let plan_id = plan.id.unwrap_or_default();
            println!("{plan_id}");
            eprintln!("{}", next.reason);
            if let Some(entry) = set.get_entry(plan_id) {
                eprintln!("  File: {}", entry.path.display());
            }
        }
        None => println!("{}", next.reason),
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank set-status / plank done
// -----------------------------------------------------------------------

pub fn cmd_set_status(
    ctx: &mut AppContext,
    input: &str,
    status: PlanStatus,
    force: bool,
) -> Result<()> {
    let id = resolve_plan_id(&mut ctx.store, input)?;
    let change = ctx
        .with_claims(|store, claims| set_plan_status(store, id, status, force, Some(claims)))
        .with_context(|| format!("failed to set status of plan {id}"))?;

    if change.previous == change.status {
        println!("Plan {id} is already {}", change.status);
    } else {
        println!("Plan {id}: {} -> {}", change.previous, change.status);
    }
    if change.tasks_marked_done > 0 {
        println!("  Marked {} remaining task(s) done", change.tasks_marked_done);
    }
    if change.claim_released {
        println!("  Released workspace claim");
    }
    for warning in &change.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

// -----------------------------------------------------------------------
// plank validate
// -----------------------------------------------------------------------

pub fn cmd_validate(ctx: &mut AppContext, dry_run: bool) -> Result<()> {
    let repair = repair_back_references(&mut ctx.store, dry_run)?;
    let report = &repair.report;

    for (child, parent) in &report.dangling_parents {
        println!("Plan {child} has parent {parent}, which does not exist");
    }
    for (plan, dep) in &report.dangling_dependencies {
        println!("Plan {plan} depends on {dep}, which does not exist");
    }
    for (id, paths) in &report.duplicate_ids {
        println!("ID {id} is used by {} files:", paths.len());
        for path in paths {
            println!("  {}", path.display());
        }
    }
    let verb = if dry_run { "would add" } else { "added" };
    for missing in &report.missing_back_references {
        println!(
            "Parent {} {verb} dependency on child {}",
            missing.parent_id, missing.child_id
        );
    }

    if report.is_clean() {
        let total = ctx.store.load()?.len();
        println!("Validated {total} plan(s): no issues found.");
        return Ok(());
    }

    if dry_run {
        println!("Dry run: {} back-reference(s) would be repaired.", repair.fixed);
    } else {
        println!("Repaired {} back-reference(s).", repair.fixed);
    }
    if !report.duplicate_ids.is_empty() {
        println!("Duplicate ids found; run `plank renumber` to resolve them.");
    }
    Ok(())
}
