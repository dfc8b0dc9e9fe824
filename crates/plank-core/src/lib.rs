//! Plan repository operations: readiness, consistency, renumbering, status
//! lifecycle, and workspace coordination.

pub mod consistency;
pub mod lifecycle;
pub mod ready;
pub mod renumber;
pub mod vcs;
pub mod workspace;

pub use consistency::{ConsistencyReport, RepairReport, check_consistency, repair_back_references};
pub use lifecycle::{ClaimContext, LifecycleError, StatusChange, claim_plan, set_plan_status};
pub use ready::{NextReady, ReadyError, ReadyReason, find_next_ready_dependency};
pub use renumber::{RenumberError, RenumberOptions, RenumberPlan, apply_renumbering, plan_renumbering};
pub use vcs::{GitCli, Vcs, VcsError};
