//! Registry of known workspaces, stored as `workspaces.json` in the data
//! directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use plank_store::fsutil::write_atomic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::identity::RepositoryId;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("workspace registry I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace registry {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub path: PathBuf,
    pub repository_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl WorkspaceEntry {
    pub fn new(path: PathBuf, repository_id: &RepositoryId) -> Self {
        let now = Utc::now();
        Self {
            path,
            repository_id: repository_id.to_string(),
            branch: None,
            plan_uuid: None,
            created_at: now,
            last_used_at: now,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    workspaces: Vec<WorkspaceEntry>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceRegistry {
    path: PathBuf,
}

impl WorkspaceRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("workspaces.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registered workspaces, optionally restricted to one repository,
    /// most recently used first.
    pub fn list(&self, repo: Option<&RepositoryId>) -> Result<Vec<WorkspaceEntry>, RegistryError> {
        let mut entries: Vec<WorkspaceEntry> = self
            .read()?
            .workspaces
            .into_iter()
            .filter(|e| repo.is_none_or(|r| e.repository_id == r.as_str()))
            .collect();
        entries.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at).then(a.path.cmp(&b.path)));
        Ok(entries)
    }

    pub fn get(&self, path: &Path) -> Result<Option<WorkspaceEntry>, RegistryError> {
        Ok(self.read()?.workspaces.into_iter().find(|e| e.path == path))
    }

    /// Insert or replace the entry for `entry.path`. The original
    /// `created_at` is kept on update.
    pub fn upsert(&self, mut entry: WorkspaceEntry) -> Result<(), RegistryError> {
        let mut file = self.read()?;
        match file.workspaces.iter_mut().find(|e| e.path == entry.path) {
            Some(existing) => {
                entry.created_at = existing.created_at;
                *existing = entry;
            }
            None => file.workspaces.push(entry),
        }
        self.write(&file)
    }

    /// Record use of a workspace: branch, plan, and `last_used_at`.
    /// Returns false when the path is not registered.
    pub fn touch(
        &self,
        path: &Path,
        branch: Option<String>,
        plan_uuid: Option<Uuid>,
    ) -> Result<bool, RegistryError> {
        let mut file = self.read()?;
        let Some(entry) = file.workspaces.iter_mut().find(|e| e.path == path) else {
            return Ok(false);
        };
        entry.last_used_at = Utc::now();
        if branch.is_some() {
            entry.branch = branch;
        }
        if plan_uuid.is_some() {
            entry.plan_uuid = plan_uuid;
        }
        self.write(&file)?;
        Ok(true)
    }

    pub fn remove(&self, path: &Path) -> Result<bool, RegistryError> {
        let mut file = self.read()?;
        let before = file.workspaces.len();
        file.workspaces.retain(|e| e.path != path);
        if file.workspaces.len() == before {
            return Ok(false);
        }
        self.write(&file)?;
        Ok(true)
    }

    fn read(&self) -> Result<RegistryFile, RegistryError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RegistryFile::default()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        let json = serde_json::to_vec_pretty(file).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &json).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn upsert_list_and_remove() {
        let dir = TempDir::new().unwrap();
        let registry = WorkspaceRegistry::new(dir.path());
        let repo = RepositoryId::new("example.com/team/plans");
        let other = RepositoryId::new("example.com/team/other");

        registry.upsert(WorkspaceEntry::new("/ws/a".into(), &repo)).unwrap();
        registry.upsert(WorkspaceEntry::new("/ws/b".into(), &repo)).unwrap();
        registry.upsert(WorkspaceEntry::new("/ws/c".into(), &other)).unwrap();

        assert_eq!(registry.list(None).unwrap().len(), 3);
        assert_eq!(registry.list(Some(&repo)).unwrap().len(), 2);

        assert!(registry.remove(Path::new("/ws/a")).unwrap());
        assert!(!registry.remove(Path::new("/ws/a")).unwrap());
        assert_eq!(registry.list(Some(&repo)).unwrap().len(), 1);
    }

    #[test]
    fn upsert_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let registry = WorkspaceRegistry::new(dir.path());
        let repo = RepositoryId::new("example.com/team/plans");

        let first = WorkspaceEntry::new("/ws/a".into(), &repo);
        let created = first.created_at;
        registry.upsert(first).unwrap();

        let mut again = WorkspaceEntry::new("/ws/a".into(), &repo);
        again.branch = Some("plan-4".to_string());
        registry.upsert(again).unwrap();

        let stored = registry.get(Path::new("/ws/a")).unwrap().unwrap();
        assert_eq!(stored.created_at, created);
        assert_eq!(stored.branch.as_deref(), Some("plan-4"));
    }

    #[test]
    fn touch_updates_usage() {
        let dir = TempDir::new().unwrap();
        let registry = WorkspaceRegistry::new(dir.path());
        let repo = RepositoryId::new("example.com/team/plans");
        registry.upsert(WorkspaceEntry::new("/ws/a".into(), &repo)).unwrap();

        let uuid = Uuid::new_v4();
        assert!(registry.touch(Path::new("/ws/a"), Some("plan-1".into()), Some(uuid)).unwrap());
        assert!(!registry.touch(Path::new("/ws/missing"), None, None).unwrap());

        let stored = registry.get(Path::new("/ws/a")).unwrap().unwrap();
        assert_eq!(stored.plan_uuid, Some(uuid));
        assert_eq!(stored.branch.as_deref(), Some("plan-1"));
    }
}
