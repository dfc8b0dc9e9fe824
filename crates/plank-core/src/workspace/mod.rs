//! Workspace coordination: who works on which plan, and where.
//!
//! - [`identity`] names the logical repository shared by all clones.
//! - [`claims`] records plan assignments keyed by plan uuid.
//! - [`lock`] guards a single workspace against concurrent runs.
//! - [`registry`] remembers workspaces for reuse.
//! - [`reuse`] picks (or creates) a workspace for a new run.

pub mod claims;
pub mod identity;
pub mod lock;
pub mod registry;
pub mod reuse;

pub use claims::{ClaimEntry, ClaimError, ClaimOutcome, ClaimRequest, ClaimStore, ReleaseOutcome};
pub use identity::{RepositoryId, normalize_remote_url, repository_id};
pub use lock::{
    LockError, LockInfo, LockKind, LockRequest, LockStatus, WorkspaceLock, default_stale_after,
    force_release, lock_status, read_lock, release_lock,
};
pub use registry::{RegistryError, WorkspaceEntry, WorkspaceRegistry};
pub use reuse::{
    AttemptOutcome, ReuseAttempt, ReusedWorkspace, WorkspaceError, checkout_from_trunk,
    create_workspace, select_workspace,
};
