use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric plan identifier. Unique within a consistent store, but may be
/// reassigned by renumbering; use [`Plan::uuid`] as a durable key.
pub type PlanId = u64;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Cancelled,
    Deferred,
}

impl PlanStatus {
    /// Terminal statuses end a plan's life; claims on it are dropped.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Whether the plan may still be picked up for work.
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Deferred => "deferred",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "deferred" => Ok(Self::Deferred),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid plan status: {:?} (expected pending, in_progress, done, cancelled, or deferred)",
            self.0
        )
    }
}

impl std::error::Error for PlanStatusParseError {}

// ---------------------------------------------------------------------------

/// Priority of a plan.
///
/// `Maybe` marks speculative work that automatic readiness selection never
/// picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Maybe,
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Sort rank used by readiness selection. Untagged plans rank 0.
    pub fn rank(priority: Option<Self>) -> u8 {
        match priority {
            Some(Self::Urgent) => 4,
            Some(Self::High) => 3,
            Some(Self::Medium) => 2,
            Some(Self::Low) => 1,
            Some(Self::Maybe) | None => 0,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Maybe => "maybe",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maybe" => Ok(Self::Maybe),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(PriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid priority: {:?} (expected low, medium, high, urgent, or maybe)",
            self.0
        )
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------
// Tasks and steps
// ---------------------------------------------------------------------------

/// A single prompt-sized unit of work inside a complex task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub prompt: String,
    #[serde(default)]
    pub done: bool,
}

/// How a task tracks its own completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskWork {
    /// No steps; the task's own flag governs completion.
    Simple { done: bool },
    /// Complete once every step is done.
    Complex { steps: Vec<Step> },
}

/// A task within a plan.
///
/// On disk a task is a flat table; the presence of a non-empty `steps`
/// array decides whether it is [`TaskWork::Complex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TaskRecord", into = "TaskRecord")]
pub struct Task {
    pub title: String,
    pub description: String,
    pub work: TaskWork,
}

impl Task {
    /// A task with no steps.
    pub fn simple(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            work: TaskWork::Simple { done: false },
        }
    }

    /// Whether the task is finished.
    pub fn is_complete(&self) -> bool {
        match &self.work {
            TaskWork::Simple { done } => *done,
            TaskWork::Complex { steps } => steps.iter().all(|s| s.done),
        }
    }

    /// Mark the task (and every step, for complex tasks) done.
    pub fn mark_done(&mut self) {
        match &mut self.work {
            TaskWork::Simple { done } => *done = true,
            TaskWork::Complex { steps } => steps.iter_mut().for_each(|s| s.done = true),
        }
    }
}

/// Flat on-disk shape of a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskRecord {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    done: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    steps: Vec<Step>,
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        let work = if record.steps.is_empty() {
            TaskWork::Simple {
                done: record.done.unwrap_or(false),
            }
        } else {
            TaskWork::Complex {
                steps: record.steps,
            }
        };
        Self {
            title: record.title,
            description: record.description,
            work,
        }
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        let (done, steps) = match task.work {
            TaskWork::Simple { done } => (Some(done), Vec::new()),
            TaskWork::Complex { steps } => (None, steps),
        };
        Self {
            title: task.title,
            description: task.description,
            done,
            steps,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A plan document: one unit of work with tasks, a parent link, and
/// dependency edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Numeric id. `None` for stub plans that have not been numbered yet.
    pub id: Option<PlanId>,
    /// Durable identity, independent of `id`.
    pub uuid: Option<Uuid>,
    pub title: String,
    pub goal: String,
    pub details: String,
    pub status: PlanStatus,
    pub priority: Option<Priority>,
    pub parent: Option<PlanId>,
    /// Plans this plan is blocked on, in declaration order without duplicates.
    pub dependencies: Vec<PlanId>,
    /// True when all child work was delegated to dependencies.
    pub container: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Create an empty pending plan with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            uuid: None,
            title: title.into(),
            goal: String::new(),
            details: String::new(),
            status: PlanStatus::Pending,
            priority: None,
            parent: None,
            dependencies: Vec::new(),
            container: false,
            created_at: None,
            updated_at: None,
            tasks: Vec::new(),
        }
    }

    /// Add a dependency unless it is already present. Returns true if added.
    pub fn add_dependency(&mut self, id: PlanId) -> bool {
        if self.dependencies.contains(&id) {
            return false;
        }
        self.dependencies.push(id);
        true
    }

    /// Whether every task is complete (vacuously true without tasks).
    pub fn all_tasks_complete(&self) -> bool {
        self.tasks.iter().all(Task::is_complete)
    }

    /// Titles of tasks that are not finished yet.
    pub fn incomplete_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| !t.is_complete())
            .map(|t| t.title.as_str())
            .collect()
    }

    /// Short label used in diagnostics, e.g. `"Add auth (ID: 3)"`.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("{} (ID: {id})", self.title),
            None => format!("{} (no ID)", self.title),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_display_roundtrip() {
        let variants = [
            PlanStatus::Pending,
            PlanStatus::InProgress,
            PlanStatus::Done,
            PlanStatus::Cancelled,
            PlanStatus::Deferred,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: PlanStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn plan_status_accepts_hyphenated_in_progress() {
        assert_eq!(
            "in-progress".parse::<PlanStatus>().unwrap(),
            PlanStatus::InProgress
        );
    }

    #[test]
    fn plan_status_invalid() {
        assert!("bogus".parse::<PlanStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(PlanStatus::Done.is_terminal());
        assert!(PlanStatus::Cancelled.is_terminal());
        assert!(!PlanStatus::Deferred.is_terminal());
        assert!(!PlanStatus::InProgress.is_terminal());
    }

    #[test]
    fn priority_rank_order() {
        assert_eq!(Priority::rank(Some(Priority::Urgent)), 4);
        assert_eq!(Priority::rank(Some(Priority::High)), 3);
        assert_eq!(Priority::rank(Some(Priority::Medium)), 2);
        assert_eq!(Priority::rank(Some(Priority::Low)), 1);
        assert_eq!(Priority::rank(None), 0);
    }

    #[test]
    fn priority_invalid() {
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn simple_task_uses_own_flag() {
        let mut task = Task::simple("write docs", "");
        assert!(!task.is_complete());
        task.mark_done();
        assert!(task.is_complete());
    }

    #[test]
    fn complex_task_needs_every_step() {
        let task = Task {
            title: "impl".into(),
            description: String::new(),
            work: TaskWork::Complex {
                steps: vec![
                    Step {
                        prompt: "a".into(),
                        done: true,
                    },
                    Step {
                        prompt: "b".into(),
                        done: false,
                    },
                ],
            },
        };
        assert!(!task.is_complete());
    }

    #[test]
    fn empty_step_list_is_simple() {
        let record = TaskRecord {
            title: "t".into(),
            description: String::new(),
            done: Some(true),
            steps: vec![],
        };
        let task = Task::from(record);
        assert_eq!(task.work, TaskWork::Simple { done: true });
    }

    #[test]
    fn add_dependency_deduplicates() {
        let mut plan = Plan::new("p");
        assert!(plan.add_dependency(2));
        assert!(!plan.add_dependency(2));
        assert!(plan.add_dependency(3));
        assert_eq!(plan.dependencies, vec![2, 3]);
    }

    #[test]
    fn incomplete_tasks_lists_titles() {
        let mut plan = Plan::new("p");
        assert!(plan.all_tasks_complete());
        plan.tasks.push(Task::simple("one", ""));
        let mut two = Task::simple("two", "");
        two.mark_done();
        plan.tasks.push(two);
        assert!(!plan.all_tasks_complete());
        assert_eq!(plan.incomplete_tasks(), vec!["one"]);
    }
}
