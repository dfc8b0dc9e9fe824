//! Readiness resolution: which plan under a root should be worked on next.
//!
//! The resolver walks the root's `dependencies` breadth-first, filters the
//! reachable plans down to actionable candidates, and ranks the ready ones.
//! When nothing is ready it reports why, so the CLI can print a useful
//! diagnostic instead of a bare "nothing to do".

use std::collections::{HashSet, VecDeque};
use std::fmt;

use plank_store::{Plan, PlanId, PlanSet, PlanStatus, Priority};
use thiserror::Error;

/// Errors from readiness resolution.
#[derive(Debug, Error)]
pub enum ReadyError {
    #[error("plan {0} not found")]
    PlanNotFound(PlanId),
}

/// Why the resolver returned what it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyReason {
    /// A dependency is ready.
    Ready { id: PlanId, title: String },
    /// The root has no dependencies; work on it directly.
    NoDependencies,
    /// Every dependency is done; the root itself is next.
    AllDependenciesComplete,
    /// The root is already finished.
    RootComplete,
    /// The only open dependencies are `maybe` priority.
    AllMaybe,
    /// A pending dependency has no tasks yet and needs planning first.
    PendingWithoutTasks { id: PlanId },
    /// Open dependencies exist but each waits on unfinished prerequisites.
    Blocked { waiting_on: Vec<PlanId> },
    /// Remaining dependencies are deferred or cancelled.
    NoActionable,
}

impl fmt::Display for ReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { id, title } => write!(f, "Found ready plan: {title} (ID: {id})"),
            Self::NoDependencies => f.write_str("No dependencies; the plan itself is ready"),
            Self::AllDependenciesComplete => {
                f.write_str("All dependencies are complete; the plan itself is ready")
            }
            Self::RootComplete => f.write_str("The plan and its dependencies are complete"),
            Self::AllMaybe => {
                f.write_str("All open dependencies have 'maybe' priority and are not auto-selected")
            }
            Self::PendingWithoutTasks { id } => write!(
                f,
                "Dependency {id} is pending but has no tasks; add tasks before starting it"
            ),
            Self::Blocked { waiting_on } => {
                let ids: Vec<String> = waiting_on.iter().map(PlanId::to_string).collect();
                write!(
                    f,
                    "Open dependencies are blocked by incomplete prerequisites: {}",
                    ids.join(", ")
                )
            }
            Self::NoActionable => {
                f.write_str("No actionable dependencies; the rest are deferred or cancelled")
            }
        }
    }
}

/// Result of [`find_next_ready_dependency`].
#[derive(Debug, Clone)]
pub struct NextReady<'a> {
    pub plan: Option<&'a Plan>,
    pub reason: ReadyReason,
}

/// Find the best next actionable plan under `root_id`.
///
/// Candidates are the transitive dependencies of the root that are pending
/// or in progress and not `maybe` priority. A candidate is ready when it is
/// in progress, or when it is pending, has tasks, and every one of its own
/// dependencies is done. Ready candidates are ranked in-progress first, then
/// by priority, then by ascending id.
pub fn find_next_ready_dependency(
    set: &PlanSet,
    root_id: PlanId,
) -> Result<NextReady<'_>, ReadyError> {
    let root = set.get(root_id).ok_or(ReadyError::PlanNotFound(root_id))?;
    let root_done = root.status == PlanStatus::Done;

    let deps = collect_dependencies(set, root_id);
    tracing::debug!(root_id, reachable = deps.len(), "collected dependencies");

    if deps.is_empty() {
        return Ok(root_or_complete(root, root_done, ReadyReason::NoDependencies));
    }

    if deps.iter().all(|p| p.status == PlanStatus::Done) {
        return Ok(root_or_complete(
            root,
            root_done,
            ReadyReason::AllDependenciesComplete,
        ));
    }

    let open: Vec<&Plan> = deps
        .iter()
        .copied()
        .filter(|p| p.status.is_actionable())
        .collect();
    let candidates: Vec<&Plan> = open
        .iter()
        .copied()
        .filter(|p| p.priority != Some(Priority::Maybe))
        .collect();

    let mut ready: Vec<&Plan> = candidates
        .iter()
        .copied()
        .filter(|p| is_ready(set, p))
        .collect();
    ready.sort_by_key(|p| sort_key(p));

    if let Some(&best) = ready.first() {
        let id = best.id.unwrap_or_default();
        tracing::debug!(root_id, plan_id = id, "found ready plan");
        return Ok(NextReady {
            plan: Some(best),
            reason: ReadyReason::Ready {
                id,
                title: best.title.clone(),
            },
        });
    }

    let reason = if candidates.is_empty() {
        if open.is_empty() {
            ReadyReason::NoActionable
        } else {
            ReadyReason::AllMaybe
        }
    } else {
        let mut sorted = candidates.clone();
        sorted.sort_by_key(|p| sort_key(p));
        match sorted
            .iter()
            .find(|p| p.status == PlanStatus::Pending && p.tasks.is_empty())
        {
            Some(p) => ReadyReason::PendingWithoutTasks {
                id: p.id.unwrap_or_default(),
            },
            None => ReadyReason::Blocked {
                waiting_on: sorted.iter().filter_map(|p| p.id).collect(),
            },
        }
    };

    Ok(NextReady { plan: None, reason })
}

fn root_or_complete(root: &Plan, root_done: bool, reason: ReadyReason) -> NextReady<'_> {
    if root_done {
        NextReady {
            plan: None,
            reason: ReadyReason::RootComplete,
        }
    } else {
        NextReady {
            plan: Some(root),
            reason,
        }
    }
}

/// Breadth-first walk over `dependencies`, excluding the root. Unknown ids
/// are skipped.
fn collect_dependencies(set: &PlanSet, root_id: PlanId) -> Vec<&Plan> {
    let mut visited: HashSet<PlanId> = HashSet::from([root_id]);
    let mut queue: VecDeque<PlanId> = VecDeque::from([root_id]);
    let mut found = Vec::new();

    while let Some(id) = queue.pop_front() {
        let Some(plan) = set.get(id) else {
            continue;
        };
        for &dep in &plan.dependencies {
            if !visited.insert(dep) {
                continue;
            }
            if let Some(dep_plan) = set.get(dep) {
                found.push(dep_plan);
                queue.push_back(dep);
            }
        }
    }

    found
}

fn is_ready(set: &PlanSet, plan: &Plan) -> bool {
    match plan.status {
        PlanStatus::InProgress => true,
        PlanStatus::Pending => {
            !plan.tasks.is_empty()
                && plan
                    .dependencies
                    .iter()
                    .all(|d| set.get(*d).is_some_and(|p| p.status == PlanStatus::Done))
        }
        _ => false,
    }
}

/// In progress before pending, then higher priority, then lower id.
fn sort_key(plan: &Plan) -> (u8, std::cmp::Reverse<u8>, PlanId) {
    let status_rank = if plan.status == PlanStatus::InProgress { 0 } else { 1 };
    (
        status_rank,
        std::cmp::Reverse(Priority::rank(plan.priority)),
        plan.id.unwrap_or(PlanId::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use plank_store::{StoredPlan, Task};
    use std::path::PathBuf;

    fn plan(id: PlanId, status: PlanStatus, deps: &[PlanId]) -> Plan {
        let mut p = Plan::new(format!("plan {id}"));
        p.id = Some(id);
        p.status = status;
        p.dependencies = deps.to_vec();
        p
    }

    fn with_task(mut p: Plan) -> Plan {
        p.tasks.push(Task::simple("work", ""));
        p
    }

    fn set_of(plans: Vec<Plan>) -> PlanSet {
        let entries = plans
            .into_iter()
            .map(|p| StoredPlan {
                path: PathBuf::from(format!("/tasks/{}.toml", p.id.unwrap_or_default())),
                plan: p,
            })
            .collect();
        PlanSet::from_entries("/tasks", entries)
    }

    #[test]
    fn unknown_root_is_an_error() {
        let set = set_of(vec![]);
        assert!(matches!(
            find_next_ready_dependency(&set, 4),
            Err(ReadyError::PlanNotFound(4))
        ));
    }

    #[test]
    fn root_without_dependencies_is_returned() {
        let set = set_of(vec![plan(1, PlanStatus::Pending, &[])]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.plan.and_then(|p| p.id), Some(1));
        assert_eq!(next.reason, ReadyReason::NoDependencies);
    }

    #[test]
    fn finished_root_returns_nothing() {
        let set = set_of(vec![plan(1, PlanStatus::Done, &[])]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert!(next.plan.is_none());
        assert_eq!(next.reason, ReadyReason::RootComplete);
    }

    #[test]
    fn all_dependencies_done_returns_root() {
        let set = set_of(vec![
            plan(1, PlanStatus::InProgress, &[2]),
            plan(2, PlanStatus::Done, &[]),
        ]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.plan.and_then(|p| p.id), Some(1));
        assert_eq!(next.reason, ReadyReason::AllDependenciesComplete);
    }

    #[test]
    fn status_beats_priority() {
        let mut urgent = with_task(plan(2, PlanStatus::Pending, &[]));
        urgent.priority = Some(Priority::Urgent);
        let mut high = with_task(plan(3, PlanStatus::InProgress, &[]));
        high.priority = Some(Priority::High);
        let mut low = with_task(plan(4, PlanStatus::Pending, &[]));
        low.priority = Some(Priority::Low);

        let set = set_of(vec![plan(1, PlanStatus::Pending, &[2, 3, 4]), urgent, high, low]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.plan.and_then(|p| p.id), Some(3));
    }

    #[test]
    fn lower_id_breaks_ties() {
        let set = set_of(vec![
            plan(1, PlanStatus::Pending, &[5, 4]),
            with_task(plan(4, PlanStatus::Pending, &[])),
            with_task(plan(5, PlanStatus::Pending, &[])),
        ]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.plan.and_then(|p| p.id), Some(4));
    }

    #[test]
    fn transitive_dependencies_are_considered() {
        let set = set_of(vec![
            plan(1, PlanStatus::Pending, &[2]),
            plan(2, PlanStatus::Pending, &[3]),
            with_task(plan(3, PlanStatus::Pending, &[])),
        ]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.plan.and_then(|p| p.id), Some(3));
    }

    #[test]
    fn maybe_dependencies_are_not_selected() {
        let mut maybe = with_task(plan(2, PlanStatus::Pending, &[]));
        maybe.priority = Some(Priority::Maybe);
        let set = set_of(vec![plan(1, PlanStatus::Pending, &[2]), maybe]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert!(next.plan.is_none());
        assert_eq!(next.reason, ReadyReason::AllMaybe);
    }

    #[test]
    fn pending_without_tasks_is_reported() {
        let set = set_of(vec![
            plan(1, PlanStatus::Pending, &[2]),
            plan(2, PlanStatus::Pending, &[]),
        ]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.reason, ReadyReason::PendingWithoutTasks { id: 2 });
    }

    #[test]
    fn cyclic_pending_dependencies_are_blocked() {
        let set = set_of(vec![
            plan(1, PlanStatus::Pending, &[2]),
            with_task(plan(2, PlanStatus::Pending, &[3])),
            with_task(plan(3, PlanStatus::Pending, &[2])),
        ]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert!(next.plan.is_none());
        assert_eq!(
            next.reason,
            ReadyReason::Blocked {
                waiting_on: vec![2, 3]
            }
        );
    }

    #[test]
    fn deferred_dependencies_are_not_actionable() {
        let set = set_of(vec![
            plan(1, PlanStatus::Pending, &[2, 3]),
            plan(2, PlanStatus::Done, &[]),
            with_task(plan(3, PlanStatus::Deferred, &[])),
        ]);
        let next = find_next_ready_dependency(&set, 1).unwrap();
        assert_eq!(next.reason, ReadyReason::NoActionable);
    }

    #[test]
    fn ready_reason_message() {
        let reason = ReadyReason::Ready {
            id: 3,
            title: "Login".into(),
        };
        assert_eq!(reason.to_string(), "Found ready plan: Login (ID: 3)");
    }
}
