//! Plan claims: which workspaces and users are working on which plan.
//!
//! Claims are keyed by plan uuid (numeric ids can change under
//! renumbering) and stored as one JSON document per repository under the
//! data directory. Updates are additive set unions so two processes
//! claiming the same plan both end up recorded; a second claimant is
//! surfaced as a warning, never refused.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use plank_store::PlanId;
use plank_store::fsutil::write_atomic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::identity::RepositoryId;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("claim store I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("claim store {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One plan's assignment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEntry {
    /// Numeric id at the time of the last claim, for display only.
    pub plan_id: PlanId,
    #[serde(default)]
    pub workspace_paths: BTreeSet<PathBuf>,
    #[serde(default)]
    pub users: BTreeSet<String>,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClaimFile {
    #[serde(default)]
    repository_id: String,
    #[serde(default)]
    claims: BTreeMap<Uuid, ClaimEntry>,
}

/// Parameters of a claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub uuid: Uuid,
    pub repository_id: RepositoryId,
    pub workspace_path: PathBuf,
    pub user: Option<String>,
}

/// What a claim changed.
#[derive(Debug, Clone, Default)]
pub struct ClaimOutcome {
    /// No claim existed for the plan before.
    pub created: bool,
    pub added_workspace: bool,
    pub added_user: bool,
    /// False when the updated claim could not be written.
    pub persisted: bool,
    pub warnings: Vec<String>,
}

/// What a release changed.
#[derive(Debug, Clone, Default)]
pub struct ReleaseOutcome {
    pub existed: bool,
    pub removed_workspace: bool,
    pub removed_user: bool,
    /// The entry became empty and was deleted.
    pub entry_removed: bool,
}

/// File-backed claim store rooted in the data directory.
#[derive(Debug, Clone)]
pub struct ClaimStore {
    dir: PathBuf,
}

impl ClaimStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("claims"),
        }
    }

    /// Path of the claim document for `repo`.
    pub fn path_for(&self, repo: &RepositoryId) -> PathBuf {
        self.dir.join(format!("{}.json", repo.storage_key()))
    }

    /// Record that `request.workspace_path` (and user) works on the plan.
    ///
    /// Idempotent: repeating a claim changes nothing and writes nothing.
    /// Read failures are errors; write failures are reported through
    /// `persisted = false` and a warning.
    pub fn claim_plan(
        &self,
        plan_id: PlanId,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, ClaimError> {
        let repo = &request.repository_id;
        let mut file = self.read(repo)?;
        let now = Utc::now();
        let mut outcome = ClaimOutcome::default();

        let entry = match file.claims.get_mut(&request.uuid) {
            Some(entry) => entry,
            None => {
                outcome.created = true;
                file.claims.entry(request.uuid).or_insert(ClaimEntry {
                    plan_id,
                    workspace_paths: BTreeSet::new(),
                    users: BTreeSet::new(),
                    assigned_at: now,
                    updated_at: now,
                })
            }
        };

        let other_workspaces: Vec<String> = entry
            .workspace_paths
            .iter()
            .filter(|p| **p != request.workspace_path)
            .map(|p| p.display().to_string())
            .collect();
        if !other_workspaces.is_empty() {
            outcome.warnings.push(format!(
                "Plan {plan_id} is also claimed in other workspace(s): {}",
                other_workspaces.join(", ")
            ));
        }
        if let Some(ref user) = request.user {
            let other_users: Vec<&str> = entry
                .users
                .iter()
                .filter(|u| *u != user)
                .map(String::as_str)
                .collect();
            if !other_users.is_empty() {
                outcome.warnings.push(format!(
                    "Plan {plan_id} is also claimed by user(s): {}",
                    other_users.join(", ")
                ));
            }
        }

        outcome.added_workspace = entry.workspace_paths.insert(request.workspace_path.clone());
        if let Some(ref user) = request.user {
            outcome.added_user = entry.users.insert(user.clone());
        }
        let id_changed = entry.plan_id != plan_id;
        entry.plan_id = plan_id;

        let changed = outcome.created || outcome.added_workspace || outcome.added_user || id_changed;
        if !changed {
            outcome.persisted = true;
            return Ok(outcome);
        }
        entry.updated_at = now;
        let entry = entry.clone();

        // Another process may have written since the first read; merge into
        // the latest contents so neither claim is lost.
        let mut latest = match self.read(repo) {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(error = %e, "claim store unreadable before write, overwriting");
                file
            }
        };
        latest.repository_id = repo.to_string();
        merge_entry(&mut latest.claims, request.uuid, entry);

        match self.write(repo, &latest) {
            Ok(()) => {
                outcome.persisted = true;
                tracing::info!(
                    plan_id,
                    uuid = %request.uuid,
                    workspace = %request.workspace_path.display(),
                    "claimed plan"
                );
            }
            Err(e) => {
                tracing::warn!(plan_id, error = %e, "failed to persist claim");
                outcome.persisted = false;
                outcome.warnings.push(format!("Claim was not saved: {e}"));
            }
        }
        Ok(outcome)
    }

    /// Remove the whole claim for a plan. Returns whether one existed.
    pub fn release_plan(&self, repo: &RepositoryId, uuid: Uuid) -> Result<bool, ClaimError> {
        let mut file = self.read(repo)?;
        if file.claims.remove(&uuid).is_none() {
            return Ok(false);
        }
        self.write(repo, &file)?;
        tracing::info!(%uuid, repository = %repo, "released plan claim");
        Ok(true)
    }

    /// Remove one workspace (and optionally one user) from a claim. The
    /// entry is deleted once no workspace remains.
    pub fn release_workspace(
        &self,
        repo: &RepositoryId,
        uuid: Uuid,
        workspace_path: &Path,
        user: Option<&str>,
    ) -> Result<ReleaseOutcome, ClaimError> {
        let mut file = self.read(repo)?;
        let mut outcome = ReleaseOutcome::default();
        let Some(entry) = file.claims.get_mut(&uuid) else {
            return Ok(outcome);
        };
        outcome.existed = true;
        outcome.removed_workspace = entry.workspace_paths.remove(workspace_path);
        if let Some(user) = user {
            outcome.removed_user = entry.users.remove(user);
        }
        if !outcome.removed_workspace && !outcome.removed_user {
            return Ok(outcome);
        }

        if entry.workspace_paths.is_empty() {
            file.claims.remove(&uuid);
            outcome.entry_removed = true;
        } else {
            entry.updated_at = Utc::now();
        }
        self.write(repo, &file)?;
        Ok(outcome)
    }

    pub fn get(&self, repo: &RepositoryId, uuid: Uuid) -> Result<Option<ClaimEntry>, ClaimError> {
        Ok(self.read(repo)?.claims.remove(&uuid))
    }

    pub fn list(&self, repo: &RepositoryId) -> Result<BTreeMap<Uuid, ClaimEntry>, ClaimError> {
        Ok(self.read(repo)?.claims)
    }

    fn read(&self, repo: &RepositoryId) -> Result<ClaimFile, ClaimError> {
        let path = self.path_for(repo);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ClaimFile::default()),
            Err(source) => return Err(ClaimError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| ClaimError::Corrupt { path, source })
    }

    fn write(&self, repo: &RepositoryId, file: &ClaimFile) -> Result<(), ClaimError> {
        let path = self.path_for(repo);
        let json = serde_json::to_vec_pretty(file).map_err(|source| ClaimError::Corrupt {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &json).map_err(|source| ClaimError::Io { path, source })
    }
}

fn merge_entry(claims: &mut BTreeMap<Uuid, ClaimEntry>, uuid: Uuid, entry: ClaimEntry) {
    match claims.get_mut(&uuid) {
        Some(existing) => {
            existing.plan_id = entry.plan_id;
            existing.workspace_paths.extend(entry.workspace_paths);
            existing.users.extend(entry.users);
            existing.assigned_at = existing.assigned_at.min(entry.assigned_at);
            existing.updated_at = existing.updated_at.max(entry.updated_at);
        }
        None => {
            claims.insert(uuid, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(uuid: Uuid, workspace: &str, user: Option<&str>) -> ClaimRequest {
        ClaimRequest {
            uuid,
            repository_id: RepositoryId::new("example.com/team/plans"),
            workspace_path: PathBuf::from(workspace),
            user: user.map(str::to_string),
        }
    }

    #[test]
    fn first_claim_creates_entry() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let uuid = Uuid::new_v4();

        let outcome = store.claim_plan(4, &request(uuid, "/ws/a", Some("ana"))).unwrap();
        assert!(outcome.created && outcome.added_workspace && outcome.added_user);
        assert!(outcome.persisted);
        assert!(outcome.warnings.is_empty());

        let entry = store
            .get(&RepositoryId::new("example.com/team/plans"), uuid)
            .unwrap()
            .expect("claim stored");
        assert_eq!(entry.plan_id, 4);
        assert!(entry.workspace_paths.contains(Path::new("/ws/a")));
    }

    #[test]
    fn repeated_claim_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let uuid = Uuid::new_v4();
        let req = request(uuid, "/ws/a", None);

        store.claim_plan(4, &req).unwrap();
        let second = store.claim_plan(4, &req).unwrap();
        assert!(!second.created);
        assert!(!second.added_workspace);
        assert!(second.persisted);

        let entry = store.get(&req.repository_id, uuid).unwrap().unwrap();
        assert_eq!(entry.workspace_paths.len(), 1);
    }

    #[test]
    fn repositories_with_similar_ids_keep_separate_claims() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let uuid = Uuid::new_v4();
        let slash = ClaimRequest {
            repository_id: RepositoryId::new("example.com/a/b"),
            ..request(uuid, "/ws/a", None)
        };
        let underscore = RepositoryId::new("example.com/a_b");

        store.claim_plan(4, &slash).unwrap();
        assert_ne!(store.path_for(&slash.repository_id), store.path_for(&underscore));
        assert!(store.get(&underscore, uuid).unwrap().is_none());
        assert!(store.get(&slash.repository_id, uuid).unwrap().is_some());
    }

    #[test]
    fn second_workspace_is_added_with_warning() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let uuid = Uuid::new_v4();

        store.claim_plan(4, &request(uuid, "/ws/a", Some("ana"))).unwrap();
        let outcome = store.claim_plan(4, &request(uuid, "/ws/b", Some("bo"))).unwrap();
        assert!(!outcome.created);
        assert!(outcome.added_workspace && outcome.added_user);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].contains("/ws/a"));

        let entry = store
            .get(&RepositoryId::new("example.com/team/plans"), uuid)
            .unwrap()
            .unwrap();
        assert_eq!(entry.workspace_paths.len(), 2);
        assert_eq!(entry.users.len(), 2);
    }

    #[test]
    fn unwritable_store_reports_not_persisted() {
        let dir = TempDir::new().unwrap();
        // A file where the claims directory should be.
        std::fs::write(dir.path().join("claims"), "not a directory").unwrap();
        let store = ClaimStore::new(dir.path());

        let outcome = store.claim_plan(1, &request(Uuid::new_v4(), "/ws/a", None));
        // Reading fails with ENOTDIR, which is an I/O error rather than NotFound.
        match outcome {
            Ok(o) => assert!(!o.persisted),
            Err(ClaimError::Io { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn release_workspace_drops_empty_entry() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let uuid = Uuid::new_v4();
        let req = request(uuid, "/ws/a", None);
        store.claim_plan(2, &req).unwrap();

        let outcome = store
            .release_workspace(&req.repository_id, uuid, Path::new("/ws/a"), None)
            .unwrap();
        assert!(outcome.existed && outcome.removed_workspace && outcome.entry_removed);
        assert!(store.list(&req.repository_id).unwrap().is_empty());
    }

    #[test]
    fn release_plan_removes_all_workspaces() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let uuid = Uuid::new_v4();
        store.claim_plan(2, &request(uuid, "/ws/a", None)).unwrap();
        store.claim_plan(2, &request(uuid, "/ws/b", None)).unwrap();

        let repo = RepositoryId::new("example.com/team/plans");
        assert!(store.release_plan(&repo, uuid).unwrap());
        assert!(!store.release_plan(&repo, uuid).unwrap());
        assert!(store.get(&repo, uuid).unwrap().is_none());
    }

    #[test]
    fn merge_keeps_concurrent_additions() {
        let uuid = Uuid::new_v4();
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let mut claims = BTreeMap::new();
        claims.insert(
            uuid,
            ClaimEntry {
                plan_id: 3,
                workspace_paths: BTreeSet::from([PathBuf::from("/ws/other")]),
                users: BTreeSet::from(["bo".to_string()]),
                assigned_at: earlier,
                updated_at: earlier,
            },
        );
        let now = Utc::now();
        merge_entry(
            &mut claims,
            uuid,
            ClaimEntry {
                plan_id: 3,
                workspace_paths: BTreeSet::from([PathBuf::from("/ws/mine")]),
                users: BTreeSet::from(["ana".to_string()]),
                assigned_at: now,
                updated_at: now,
            },
        );
        let merged = &claims[&uuid];
        assert_eq!(merged.workspace_paths.len(), 2);
        assert_eq!(merged.users.len(), 2);
        assert_eq!(merged.assigned_at, earlier);
        assert_eq!(merged.updated_at, now);
    }

    #[test]
    fn corrupt_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ClaimStore::new(dir.path());
        let repo = RepositoryId::new("example.com/team/plans");
        std::fs::create_dir_all(dir.path().join("claims")).unwrap();
        std::fs::write(store.path_for(&repo), "{ not json").unwrap();
        assert!(matches!(store.list(&repo), Err(ClaimError::Corrupt { .. })));
    }
}
