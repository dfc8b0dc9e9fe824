//! Per-invocation state shared by the command handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use plank_core::ClaimContext;
use plank_core::vcs::GitCli;
use plank_core::workspace::{ClaimStore, RepositoryId, WorkspaceRegistry, repository_id};
use plank_store::PlanStore;

use crate::config::{Overrides, PlankConfig};

pub struct AppContext {
    pub config: PlankConfig,
    pub cwd: PathBuf,
    pub store: PlanStore,
    pub vcs: GitCli,
    pub claims: ClaimStore,
    pub registry: WorkspaceRegistry,
    repo_id: Option<RepositoryId>,
}

impl AppContext {
    pub fn new(overrides: &Overrides, cwd: PathBuf) -> Result<Self> {
        let config = PlankConfig::resolve(overrides, &cwd).context("failed to resolve config")?;
        tracing::debug!(
            tasks_dir = %config.tasks_dir.display(),
            data_dir = %config.data_dir.display(),
            "resolved configuration"
        );
        Ok(Self {
            store: PlanStore::open(&config.tasks_dir),
            vcs: config.vcs(),
            claims: ClaimStore::new(&config.data_dir),
            registry: WorkspaceRegistry::new(&config.data_dir),
            config,
            cwd,
            repo_id: None,
        })
    }

    /// The workspace commands act on when none is named: the enclosing
    /// repository root, or the working directory outside a repository.
    pub fn default_workspace(&self) -> PathBuf {
        self.config
            .repo_root
            .clone()
            .unwrap_or_else(|| self.cwd.clone())
    }

    /// Make a user-supplied workspace path absolute.
    pub fn workspace_path(&self, path: Option<&Path>) -> PathBuf {
        match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.cwd.join(p),
            None => self.default_workspace(),
        }
    }

    /// Identity of the current repository. Outside git the working
    /// directory stands in for it.
    pub fn repository_id(&mut self) -> RepositoryId {
        if let Some(ref id) = self.repo_id {
            return id.clone();
        }
        let id = match repository_id(&self.vcs, &self.cwd) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(error = %e, "no repository identity, using working directory");
                RepositoryId::from_local_path(&self.cwd)
            }
        };
        self.repo_id = Some(id.clone());
        id
    }

    /// Split borrows for lifecycle operations that need the store mutably
    /// while reading the claim store.
    pub fn with_claims<T>(
        &mut self,
        f: impl FnOnce(&mut PlanStore, ClaimContext<'_>) -> T,
    ) -> T {
        let repository_id = self.repository_id();
        let ctx = ClaimContext {
            claims: &self.claims,
            repository_id: &repository_id,
        };
        f(&mut self.store, ctx)
    }
}
