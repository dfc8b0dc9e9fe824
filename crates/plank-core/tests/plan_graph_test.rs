//! Readiness and consistency over plan files on disk.

use plank_core::consistency::{check_consistency, repair_back_references};
use plank_core::ready::{ReadyReason, find_next_ready_dependency};
use plank_core::{StatusChange, set_plan_status};
use plank_store::{NewPlan, PlanStatus, PlanStore, Task};
use plank_test_utils::PlanFixture;
use tempfile::TempDir;

fn store_with(fixtures: &[PlanFixture]) -> (TempDir, PlanStore) {
    let dir = TempDir::new().unwrap();
    for fixture in fixtures {
        fixture.write(dir.path());
    }
    let store = PlanStore::open(dir.path());
    (dir, store)
}

#[test]
fn ready_dependency_is_found_through_files() {
    let (_dir, mut store) = store_with(&[
        PlanFixture::new(1, "Epic").deps(&[2, 3]),
        PlanFixture::new(2, "Done first").status("done").task("a", true),
        PlanFixture::new(3, "Next up").task("b", false),
    ]);
    let set = store.load().unwrap();
    let next = find_next_ready_dependency(set, 1).unwrap();
    assert_eq!(next.plan.and_then(|p| p.id), Some(3));
    assert_eq!(next.reason.to_string(), "Found ready plan: Next up (ID: 3)");
}

#[test]
fn in_progress_and_priority_order_selection() {
    let (_dir, mut store) = store_with(&[
        PlanFixture::new(1, "Epic").deps(&[2, 3, 4]),
        PlanFixture::new(2, "Low").priority("low").task("a", false),
        PlanFixture::new(3, "Urgent").priority("urgent").task("a", false),
        PlanFixture::new(4, "Started").status("in_progress"),
    ]);
    let set = store.load().unwrap();
    assert_eq!(
        find_next_ready_dependency(set, 1).unwrap().plan.and_then(|p| p.id),
        Some(4)
    );

    let (_dir, mut store) = store_with(&[
        PlanFixture::new(1, "Epic").deps(&[2, 3]),
        PlanFixture::new(2, "Low").priority("low").task("a", false),
        PlanFixture::new(3, "Urgent").priority("urgent").task("a", false),
    ]);
    let set = store.load().unwrap();
    assert_eq!(
        find_next_ready_dependency(set, 1).unwrap().plan.and_then(|p| p.id),
        Some(3)
    );
}

#[test]
fn completing_children_returns_the_parent() {
    let dir = TempDir::new().unwrap();
    let mut store = PlanStore::open(dir.path());
    let root = store
        .create(NewPlan {
            title: "Epic".to_string(),
            ..NewPlan::default()
        })
        .unwrap();
    let root_id = root.plan.id.unwrap();
    let child = store
        .create(NewPlan {
            title: "Child".to_string(),
            parent: Some(root_id),
            tasks: vec![Task::simple("do it", "")],
            ..NewPlan::default()
        })
        .unwrap();
    let child_id = child.plan.id.unwrap();

    let next = find_next_ready_dependency(store.load().unwrap(), root_id).unwrap();
    assert_eq!(next.plan.and_then(|p| p.id), Some(child_id));

    let change: StatusChange =
        set_plan_status(&mut store, child_id, PlanStatus::Done, true, None).unwrap();
    assert_eq!(change.tasks_marked_done, 1);

    let next = find_next_ready_dependency(store.load().unwrap(), root_id).unwrap();
    assert_eq!(next.plan.and_then(|p| p.id), Some(root_id));
    assert_eq!(next.reason, ReadyReason::AllDependenciesComplete);
}

#[test]
fn repair_adds_each_missing_back_reference_once() {
    let (_dir, mut store) = store_with(&[
        PlanFixture::new(1, "Parent").deps(&[2]),
        PlanFixture::new(2, "Listed").parent(1),
        PlanFixture::new(3, "Unlisted").parent(1),
        PlanFixture::new(4, "Orphan").parent(40),
    ]);

    let report = check_consistency(store.load().unwrap());
    assert_eq!(report.missing_back_references.len(), 1);
    assert_eq!(report.dangling_parents, vec![(4, 40)]);

    let dry = repair_back_references(&mut store, true).unwrap();
    assert_eq!(dry.fixed, 1);
    assert_eq!(store.load().unwrap().get(1).unwrap().dependencies, vec![2]);

    let repaired = repair_back_references(&mut store, false).unwrap();
    assert_eq!(repaired.fixed, 1);
    assert_eq!(repaired.updated_files.len(), 1);
    assert_eq!(store.load().unwrap().get(1).unwrap().dependencies, vec![2, 3]);

    let again = repair_back_references(&mut store, false).unwrap();
    assert_eq!(again.fixed, 0);
}
