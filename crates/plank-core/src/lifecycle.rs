//! Plan status transitions and claim bookkeeping tied to them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use plank_store::{PlanEdit, PlanId, PlanStatus, PlanStore, StoreError};
use thiserror::Error;
use uuid::Uuid;

use crate::workspace::{ClaimError, ClaimOutcome, ClaimRequest, ClaimStore, RepositoryId};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("plan {0} not found")]
    PlanNotFound(PlanId),

    #[error("plan {id} has incomplete tasks: {}", tasks.join(", "))]
    IncompleteTasks { id: PlanId, tasks: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Claim(#[from] ClaimError),
}

/// Where claims for the current repository live.
#[derive(Debug, Clone, Copy)]
pub struct ClaimContext<'a> {
    pub claims: &'a ClaimStore,
    pub repository_id: &'a RepositoryId,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub plan_id: PlanId,
    pub path: PathBuf,
    pub previous: PlanStatus,
    pub status: PlanStatus,
    /// Tasks marked done by a forced completion.
    pub tasks_marked_done: usize,
    pub claim_released: bool,
    pub warnings: Vec<String>,
}

/// Set a plan's status.
///
/// `done` requires every task complete unless `force` is set, in which case
/// the remaining tasks are marked done. The status is written first; moving
/// to a terminal status then drops the plan's claims on a best-effort basis.
pub fn set_plan_status(
    store: &mut PlanStore,
    plan_id: PlanId,
    status: PlanStatus,
    force: bool,
    claims: Option<ClaimContext<'_>>,
) -> Result<StatusChange, LifecycleError> {
    let entry = store
        .load()?
        .get_entry(plan_id)
        .cloned()
        .ok_or(LifecycleError::PlanNotFound(plan_id))?;
    let previous = entry.plan.status;
    let now = Utc::now();
    let mut tasks_marked_done = 0;

    let incomplete: Vec<String> = entry
        .plan
        .incomplete_tasks()
        .into_iter()
        .map(str::to_string)
        .collect();

    if status == PlanStatus::Done && !incomplete.is_empty() {
        if !force {
            return Err(LifecycleError::IncompleteTasks {
                id: plan_id,
                tasks: incomplete,
            });
        }
        let mut plan = entry.plan.clone();
        for task in plan.tasks.iter_mut().filter(|t| !t.is_complete()) {
            task.mark_done();
            tasks_marked_done += 1;
        }
        plan.status = status;
        plan.updated_at = Some(now);
        store.save(&entry.path, &plan)?;
    } else {
        let edit = PlanEdit {
            status: Some(status),
            updated_at: Some(now),
            ..PlanEdit::default()
        };
        store.edit(&entry.path, &edit)?;
    }
    tracing::info!(plan_id, from = %previous, to = %status, "updated plan status");

    let mut change = StatusChange {
        plan_id,
        path: entry.path,
        previous,
        status,
        tasks_marked_done,
        claim_released: false,
        warnings: Vec::new(),
    };

    if status.is_terminal() {
        if let (Some(ctx), Some(uuid)) = (claims, entry.plan.uuid) {
            match ctx.claims.release_plan(ctx.repository_id, uuid) {
                Ok(released) => change.claim_released = released,
                Err(e) => {
                    tracing::warn!(plan_id, error = %e, "failed to release claims");
                    change
                        .warnings
                        .push(format!("Claims for plan {plan_id} were not released: {e}"));
                }
            }
        }
    }

    Ok(change)
}

/// Result of [`claim_plan`].
#[derive(Debug, Clone)]
pub struct PlanClaim {
    pub plan_id: PlanId,
    pub uuid: Uuid,
    pub outcome: ClaimOutcome,
}

/// Claim a plan for a workspace (and optionally a user). A plan file
/// without a uuid gets one written back first.
pub fn claim_plan(
    store: &mut PlanStore,
    ctx: ClaimContext<'_>,
    plan_id: PlanId,
    workspace_path: &Path,
    user: Option<&str>,
) -> Result<PlanClaim, LifecycleError> {
    let path = plan_path(store, plan_id)?;
    let uuid = store.ensure_uuid(&path)?;
    let request = ClaimRequest {
        uuid,
        repository_id: ctx.repository_id.clone(),
        workspace_path: workspace_path.to_path_buf(),
        user: user.map(str::to_string),
    };
    let outcome = ctx.claims.claim_plan(plan_id, &request)?;
    Ok(PlanClaim {
        plan_id,
        uuid,
        outcome,
    })
}

/// Release a plan's claim: one workspace when given, otherwise the whole
/// claim. Returns whether anything was removed.
pub fn release_plan_claim(
    store: &mut PlanStore,
    ctx: ClaimContext<'_>,
    plan_id: PlanId,
    workspace_path: Option<&Path>,
    user: Option<&str>,
) -> Result<bool, LifecycleError> {
    let uuid = store
        .load()?
        .get(plan_id)
        .ok_or(LifecycleError::PlanNotFound(plan_id))?
        .uuid;
    // Without a uuid the plan was never claimed.
    let Some(uuid) = uuid else {
        return Ok(false);
    };
    match workspace_path {
        Some(workspace) => {
            let outcome = ctx
                .claims
                .release_workspace(ctx.repository_id, uuid, workspace, user)?;
            Ok(outcome.removed_workspace || outcome.removed_user)
        }
        None => Ok(ctx.claims.release_plan(ctx.repository_id, uuid)?),
    }
}

fn plan_path(store: &mut PlanStore, plan_id: PlanId) -> Result<PathBuf, LifecycleError> {
    store
        .load()?
        .get_entry(plan_id)
        .map(|e| e.path.clone())
        .ok_or(LifecycleError::PlanNotFound(plan_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plank_test_utils::PlanFixture;
    use tempfile::TempDir;

    const UUID: &str = "7b0c8d1e-4f2a-4b9c-9d3e-2a1b0c9d8e7f";

    fn setup() -> (TempDir, TempDir, PlanStore, ClaimStore, RepositoryId) {
        let tasks = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let store = PlanStore::open(tasks.path());
        let claims = ClaimStore::new(data.path());
        (tasks, data, store, claims, RepositoryId::new("example.com/team/plans"))
    }

    #[test]
    fn done_requires_complete_tasks() {
        let (tasks, _data, mut store, _, _) = setup();
        PlanFixture::new(1, "Ship it")
            .task("write code", true)
            .task("write docs", false)
            .write(tasks.path());

        let err = set_plan_status(&mut store, 1, PlanStatus::Done, false, None).unwrap_err();
        match err {
            LifecycleError::IncompleteTasks { id, tasks } => {
                assert_eq!(id, 1);
                assert_eq!(tasks, vec!["write docs".to_string()]);
            }
            other => panic!("expected IncompleteTasks, got {other}"),
        }
        assert_eq!(store.load().unwrap().get(1).unwrap().status, PlanStatus::Pending);
    }

    #[test]
    fn forced_done_marks_remaining_tasks() {
        let (tasks, _data, mut store, _, _) = setup();
        PlanFixture::new(1, "Ship it")
            .task("write code", true)
            .task("write docs", false)
            .write(tasks.path());

        let change = set_plan_status(&mut store, 1, PlanStatus::Done, true, None).unwrap();
        assert_eq!(change.tasks_marked_done, 1);
        let plan = store.load().unwrap().get(1).unwrap();
        assert_eq!(plan.status, PlanStatus::Done);
        assert!(plan.all_tasks_complete());
    }

    #[test]
    fn status_edit_preserves_comments() {
        let (tasks, _data, mut store, _, _) = setup();
        let path = tasks.path().join("1-note.toml");
        std::fs::write(&path, "# hand written\n[plan]\nid = 1\ntitle = \"note\"\n").unwrap();

        set_plan_status(&mut store, 1, PlanStatus::InProgress, false, None).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# hand written"));
        assert!(content.contains("status = \"in_progress\""));
    }

    #[test]
    fn terminal_status_releases_claims() {
        let (tasks, _data, mut store, claims, repo) = setup();
        PlanFixture::new(2, "Claimed").uuid(UUID).write(tasks.path());
        let ctx = ClaimContext {
            claims: &claims,
            repository_id: &repo,
        };

        claim_plan(&mut store, ctx, 2, Path::new("/ws/a"), None).unwrap();
        let uuid = Uuid::parse_str(UUID).unwrap();
        assert!(claims.get(&repo, uuid).unwrap().is_some());

        let change = set_plan_status(&mut store, 2, PlanStatus::Cancelled, false, Some(ctx)).unwrap();
        assert!(change.claim_released);
        assert!(change.warnings.is_empty());
        assert!(claims.get(&repo, uuid).unwrap().is_none());
    }

    #[test]
    fn claim_failure_does_not_block_status_change() {
        let (tasks, data, mut store, claims, repo) = setup();
        PlanFixture::new(2, "Claimed").uuid(UUID).write(tasks.path());
        std::fs::create_dir_all(data.path().join("claims")).unwrap();
        std::fs::write(claims.path_for(&repo), "not json").unwrap();

        let ctx = ClaimContext {
            claims: &claims,
            repository_id: &repo,
        };
        let change = set_plan_status(&mut store, 2, PlanStatus::Done, false, Some(ctx)).unwrap();
        assert_eq!(change.status, PlanStatus::Done);
        assert!(!change.claim_released);
        assert_eq!(change.warnings.len(), 1);
        assert_eq!(store.load().unwrap().get(2).unwrap().status, PlanStatus::Done);
    }

    #[test]
    fn claim_assigns_missing_uuid() {
        let (tasks, _data, mut store, claims, repo) = setup();
        let path = PlanFixture::new(3, "No uuid").write(tasks.path());
        let ctx = ClaimContext {
            claims: &claims,
            repository_id: &repo,
        };

        let first = claim_plan(&mut store, ctx, 3, Path::new("/ws/a"), Some("ana")).unwrap();
        assert!(first.outcome.created);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains(&first.uuid.to_string()));

        let second = claim_plan(&mut store, ctx, 3, Path::new("/ws/a"), Some("ana")).unwrap();
        assert_eq!(first.uuid, second.uuid);
        assert!(!second.outcome.created && !second.outcome.added_workspace);
    }

    #[test]
    fn release_single_workspace() {
        let (tasks, _data, mut store, claims, repo) = setup();
        PlanFixture::new(2, "Shared").uuid(UUID).write(tasks.path());
        let ctx = ClaimContext {
            claims: &claims,
            repository_id: &repo,
        };
        claim_plan(&mut store, ctx, 2, Path::new("/ws/a"), None).unwrap();
        claim_plan(&mut store, ctx, 2, Path::new("/ws/b"), None).unwrap();

        assert!(release_plan_claim(&mut store, ctx, 2, Some(Path::new("/ws/a")), None).unwrap());
        let entry = claims.get(&repo, Uuid::parse_str(UUID).unwrap()).unwrap().unwrap();
        assert_eq!(entry.workspace_paths.len(), 1);

        let missing = release_plan_claim(&mut store, ctx, 99, None, None).unwrap_err();
        assert!(matches!(missing, LifecycleError::PlanNotFound(99)));
    }
}
