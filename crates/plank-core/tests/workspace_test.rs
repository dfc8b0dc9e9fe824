//! Workspace coordination against real git checkouts.

use std::path::PathBuf;

use plank_core::lifecycle::{ClaimContext, claim_plan, set_plan_status};
use plank_core::vcs::{GitCli, Vcs};
use plank_core::workspace::{
    AttemptOutcome, ClaimStore, LockRequest, WorkspaceError, WorkspaceRegistry, checkout_from_trunk,
    create_workspace, default_stale_after, read_lock, repository_id, select_workspace,
};
use plank_store::{PlanStatus, PlanStore};
use plank_test_utils::{PlanFixture, create_temp_repo, git};
use tempfile::TempDir;

#[test]
fn reuse_locks_prepares_and_blocks_second_run() {
    let (_guard, repo) = create_temp_repo();
    let vcs = GitCli::new();
    let candidates = vec![repo.clone()];

    let reused = select_workspace(
        &vcs,
        &candidates,
        &LockRequest::process("agent run"),
        default_stale_after(),
        checkout_from_trunk(&vcs, "plank/1-first"),
    )
    .unwrap();
    assert_eq!(reused.previous_branch.as_deref(), Some("main"));
    assert_eq!(vcs.current_branch(&repo).unwrap().as_deref(), Some("plank/1-first"));
    // The lock directory never shows up as a change.
    assert!(!vcs.is_dirty(&repo).unwrap());

    let err = select_workspace(
        &vcs,
        &candidates,
        &LockRequest::process("agent run"),
        default_stale_after(),
        |_| Ok(()),
    )
    .unwrap_err();
    match err {
        WorkspaceError::Unavailable { attempts } => {
            assert!(matches!(attempts[0].outcome, AttemptOutcome::Locked(_)));
        }
        other => panic!("expected Unavailable, got {other}"),
    }

    reused.lock.release().unwrap();
    assert!(read_lock(&repo).unwrap().is_none());
}

#[test]
fn reuse_resumes_existing_plan_branch() {
    let (_guard, repo) = create_temp_repo();
    let vcs = GitCli::new();
    git(&repo, &["checkout", "--quiet", "-b", "plank/1-first"]);
    std::fs::write(repo.join("work.txt"), "progress").unwrap();
    git(&repo, &["add", "work.txt"]);
    git(&repo, &["commit", "--quiet", "-m", "work in progress"]);
    let tip = git(&repo, &["rev-parse", "HEAD"]);
    git(&repo, &["checkout", "--quiet", "main"]);

    let reused = select_workspace(
        &vcs,
        &[repo.clone()],
        &LockRequest::process("agent run"),
        default_stale_after(),
        checkout_from_trunk(&vcs, "plank/1-first"),
    )
    .unwrap();

    assert_eq!(vcs.current_branch(&repo).unwrap().as_deref(), Some("plank/1-first"));
    assert_eq!(git(&repo, &["rev-parse", "HEAD"]), tip);
    assert!(repo.join("work.txt").exists());
    reused.lock.release().unwrap();
}

#[test]
fn dirty_checkout_is_skipped() {
    let (_guard, repo) = create_temp_repo();
    std::fs::write(repo.join("scratch.txt"), "wip").unwrap();
    let vcs = GitCli::new();

    let err = select_workspace(
        &vcs,
        &[repo.clone()],
        &LockRequest::process("agent run"),
        default_stale_after(),
        |_| Ok(()),
    )
    .unwrap_err();
    match err {
        WorkspaceError::Unavailable { attempts } => {
            assert!(matches!(attempts[0].outcome, AttemptOutcome::Dirty));
        }
        other => panic!("expected Unavailable, got {other}"),
    }
    assert!(read_lock(&repo).unwrap().is_none());
}

#[test]
fn created_worktree_is_registered_and_reusable() {
    let (_guard, repo) = create_temp_repo();
    git(&repo, &["remote", "add", "origin", "git@example.com:team/plans.git"]);
    let base = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let vcs = GitCli::new();
    let registry = WorkspaceRegistry::new(data.path());
    let repo_id = repository_id(&vcs, &repo).unwrap();

    let path = create_workspace(
        &vcs,
        &repo,
        base.path(),
        "ws-1",
        "plank/ws-1",
        &registry,
        &repo_id,
    )
    .unwrap();
    assert!(path.join("README.md").exists());

    // The worktree belongs to the same logical repository.
    assert_eq!(repository_id(&vcs, &path).unwrap(), repo_id);

    let candidates: Vec<PathBuf> = registry
        .list(Some(&repo_id))
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    let reused = select_workspace(
        &vcs,
        &candidates,
        &LockRequest::process("agent run"),
        default_stale_after(),
        |_| Ok(()),
    )
    .unwrap();
    assert_eq!(reused.path, path);
}

#[test]
fn claims_follow_plan_lifecycle_across_clones() {
    let (_a, clone_a) = create_temp_repo();
    let (_b, clone_b) = create_temp_repo();
    for clone in [&clone_a, &clone_b] {
        git(clone, &["remote", "add", "origin", "https://example.com/team/plans.git"]);
    }
    let vcs = GitCli::new();
    let repo_id = repository_id(&vcs, &clone_a).unwrap();
    assert_eq!(repository_id(&vcs, &clone_b).unwrap(), repo_id);

    let tasks = clone_a.join("tasks");
    PlanFixture::new(1, "Shared work").write(&tasks);
    let data = TempDir::new().unwrap();
    let claims = ClaimStore::new(data.path());
    let ctx = ClaimContext {
        claims: &claims,
        repository_id: &repo_id,
    };
    let mut store = PlanStore::open(&tasks);

    let first = claim_plan(&mut store, ctx, 1, &clone_a, Some("ana")).unwrap();
    assert!(first.outcome.created);
    let second = claim_plan(&mut store, ctx, 1, &clone_b, Some("bo")).unwrap();
    assert!(second.outcome.added_workspace);
    assert!(!second.outcome.warnings.is_empty());

    let entry = claims.get(&repo_id, first.uuid).unwrap().unwrap();
    assert_eq!(entry.workspace_paths.len(), 2);

    let change = set_plan_status(&mut store, 1, PlanStatus::Done, false, Some(ctx)).unwrap();
    assert!(change.claim_released);
    assert!(claims.list(&repo_id).unwrap().is_empty());
}
