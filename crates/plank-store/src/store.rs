//! The plan store: loads plan files from a directory and persists changes.
//!
//! [`PlanStore`] is an explicit object rather than ambient global state. It
//! caches the loaded [`PlanSet`] until [`PlanStore::invalidate`] or a write
//! through the store drops it, so each caller (and each test) works against
//! its own view of the directory.

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::fsutil::write_atomic;
use crate::models::{Plan, PlanId, PlanStatus, Priority, Task};
use crate::plan_file::{
    PLAN_FILE_EXTENSION, PlanEdit, PlanFileError, edit_plan_file, parse_plan_file,
    plan_file_name, render_plan_file,
};

/// Errors raised by the plan store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A plan file could not be parsed or failed validation.
    #[error("invalid plan file {}: {source}", path.display())]
    Validation {
        path: PathBuf,
        #[source]
        source: PlanFileError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plan {0} not found")]
    NotFound(PlanId),

    #[error("no plan file at {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("plan file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A plan together with the file it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPlan {
    pub path: PathBuf,
    pub plan: Plan,
}

/// An immutable snapshot of every plan in the tasks directory.
///
/// Entries are ordered by path. Numeric ids are not assumed unique: a set
/// loaded after merging two independently numbered branches may hold
/// several plans with the same id.
#[derive(Debug, Clone, Default)]
pub struct PlanSet {
    dir: PathBuf,
    entries: Vec<StoredPlan>,
}

impl PlanSet {
    /// Build a set from already-parsed entries (sorted by path).
    pub fn from_entries(dir: impl Into<PathBuf>, mut entries: Vec<StoredPlan>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            dir: dir.into(),
            entries,
        }
    }

    /// Directory the set was loaded from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredPlan> {
        self.entries.iter()
    }

    /// Look up a plan by id. With duplicate ids the first entry by path wins.
    pub fn get(&self, id: PlanId) -> Option<&Plan> {
        self.get_entry(id).map(|e| &e.plan)
    }

    /// Like [`Self::get`] but also returns the file path.
    pub fn get_entry(&self, id: PlanId) -> Option<&StoredPlan> {
        self.entries.iter().find(|e| e.plan.id == Some(id))
    }

    /// Every entry carrying `id`.
    pub fn all_with_id(&self, id: PlanId) -> Vec<&StoredPlan> {
        self.entries.iter().filter(|e| e.plan.id == Some(id)).collect()
    }

    /// Look up a plan by its file path.
    pub fn get_by_path(&self, path: &Path) -> Option<&StoredPlan> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Look up a plan by its durable uuid.
    pub fn get_by_uuid(&self, uuid: Uuid) -> Option<&StoredPlan> {
        self.entries.iter().find(|e| e.plan.uuid == Some(uuid))
    }

    /// `(id, path)` for every numbered plan, in path order.
    pub fn ids_with_paths(&self) -> Vec<(PlanId, &Path)> {
        self.entries
            .iter()
            .filter_map(|e| e.plan.id.map(|id| (id, e.path.as_path())))
            .collect()
    }

    /// Largest id in use, or 0 for an empty set.
    pub fn max_id(&self) -> PlanId {
        self.entries
            .iter()
            .filter_map(|e| e.plan.id)
            .max()
            .unwrap_or(0)
    }

    /// The id a newly created plan receives.
    pub fn next_id(&self) -> PlanId {
        self.max_id() + 1
    }

    /// Direct children of `id` (plans whose `parent` is `id`).
    pub fn children_of(&self, id: PlanId) -> Vec<&StoredPlan> {
        self.entries
            .iter()
            .filter(|e| e.plan.parent == Some(id))
            .collect()
    }
}

/// Parameters for [`PlanStore::create`].
#[derive(Debug, Clone, Default)]
pub struct NewPlan {
    pub title: String,
    pub goal: String,
    pub details: String,
    pub priority: Option<Priority>,
    pub parent: Option<PlanId>,
    pub dependencies: Vec<PlanId>,
    pub tasks: Vec<Task>,
}

/// Loads and persists plan files in one directory.
#[derive(Debug)]
pub struct PlanStore {
    dir: PathBuf,
    cache: Option<PlanSet>,
}

impl PlanStore {
    /// Open a store over `dir`. Nothing is read until [`Self::load`].
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: None,
        }
    }

    /// The tasks directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the cached plan set, loading it from disk if needed.
    ///
    /// A missing directory yields an empty set. Any malformed plan file
    /// aborts the load with [`StoreError::Validation`].
    pub fn load(&mut self) -> Result<&PlanSet, StoreError> {
        if self.cache.is_none() {
            let set = self.read_dir()?;
            tracing::debug!(dir = %self.dir.display(), plans = set.len(), "loaded plan store");
            self.cache = Some(set);
        }
        Ok(self.cache.get_or_insert_with(PlanSet::default))
    }

    /// Drop the cached plan set so the next [`Self::load`] rereads the disk.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Invalidate and load again.
    pub fn reload(&mut self) -> Result<&PlanSet, StoreError> {
        self.invalidate();
        self.load()
    }

    /// Resolve a user-supplied plan file path: absolute paths stay as-is,
    /// relative ones are tried against the working directory first and the
    /// tasks directory second.
    pub fn resolve_path(&self, input: &Path) -> PathBuf {
        if input.is_absolute() {
            return input.to_path_buf();
        }
        if input.exists() {
            return std::env::current_dir()
                .map(|cwd| cwd.join(input))
                .unwrap_or_else(|_| input.to_path_buf());
        }
        self.dir.join(input)
    }

    /// Create a new plan file with the next free id and a fresh uuid.
    ///
    /// When a parent is given, the parent's `dependencies` gain the new id so
    /// the parent/child link stays bidirectional.
    pub fn create(&mut self, new: NewPlan) -> Result<StoredPlan, StoreError> {
        let set = self.load()?;
        let id = set.next_id();

        let parent_entry = match new.parent {
            Some(parent_id) => Some(
                set.get_entry(parent_id)
                    .cloned()
                    .ok_or(StoreError::NotFound(parent_id))?,
            ),
            None => None,
        };

        let now = Utc::now();
        let mut plan = Plan::new(new.title);
        plan.id = Some(id);
        plan.uuid = Some(Uuid::new_v4());
        plan.goal = new.goal;
        plan.details = new.details;
        plan.priority = new.priority;
        plan.parent = new.parent;
        for dep in new.dependencies {
            plan.add_dependency(dep);
        }
        plan.tasks = new.tasks;
        plan.status = PlanStatus::Pending;
        plan.created_at = Some(now);
        plan.updated_at = Some(now);

        let path = self.dir.join(plan_file_name(id, &plan.title));
        if path.exists() {
            return Err(StoreError::AlreadyExists(path));
        }
        self.write_plan(&path, &plan)?;
        tracing::info!(plan_id = id, path = %path.display(), "created plan");

        if let Some(mut parent) = parent_entry {
            if parent.plan.add_dependency(id) {
                parent.plan.updated_at = Some(now);
                self.write_plan(&parent.path, &parent.plan)?;
            }
        }

        self.invalidate();
        Ok(StoredPlan { path, plan })
    }

    /// Re-serialize `plan` into `path` atomically.
    pub fn save(&mut self, path: &Path, plan: &Plan) -> Result<(), StoreError> {
        self.write_plan(path, plan)?;
        self.invalidate();
        Ok(())
    }

    /// Apply a surgical [`PlanEdit`] to the file at `path`, keeping comments
    /// and formatting.
    pub fn edit(&mut self, path: &Path, edit: &PlanEdit) -> Result<(), StoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let updated = edit_plan_file(&content, edit).map_err(|source| StoreError::Validation {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, updated.as_bytes()).map_err(|e| StoreError::io(path, e))?;
        self.invalidate();
        Ok(())
    }

    /// Return the plan's uuid, generating and writing one back if the file
    /// was authored without it.
    pub fn ensure_uuid(&mut self, path: &Path) -> Result<Uuid, StoreError> {
        let existing = self
            .load()?
            .get_by_path(path)
            .ok_or_else(|| StoreError::PathNotFound(path.to_path_buf()))?
            .plan
            .uuid;
        if let Some(uuid) = existing {
            return Ok(uuid);
        }

        let uuid = Uuid::new_v4();
        let edit = PlanEdit {
            uuid: Some(uuid),
            ..PlanEdit::default()
        };
        self.edit(path, &edit)?;
        tracing::info!(path = %path.display(), %uuid, "assigned uuid to plan");
        Ok(uuid)
    }

    /// Delete a plan file.
    pub fn delete(&mut self, path: &Path) -> Result<(), StoreError> {
        std::fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
        self.invalidate();
        Ok(())
    }

    fn write_plan(&self, path: &Path, plan: &Plan) -> Result<(), StoreError> {
        let content = render_plan_file(plan).map_err(|source| StoreError::Validation {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, content.as_bytes()).map_err(|e| StoreError::io(path, e))
    }

    fn read_dir(&self) -> Result<PlanSet, StoreError> {
        let mut files = Vec::new();
        if self.dir.is_dir() {
            collect_plan_files(&self.dir, &mut files)?;
        } else {
            tracing::debug!(dir = %self.dir.display(), "tasks directory does not exist");
        }

        let mut entries = Vec::with_capacity(files.len());
        for path in files {
            let content =
                std::fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            let plan = parse_plan_file(&content).map_err(|source| StoreError::Validation {
                path: path.clone(),
                source,
            })?;
            entries.push(StoredPlan { path, plan });
        }

        Ok(PlanSet::from_entries(self.dir.clone(), entries))
    }
}

/// Recursively collect `*.toml` files, skipping hidden entries.
fn collect_plan_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let read = std::fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in read {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_plan_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(PLAN_FILE_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut store = PlanStore::open(dir.path().join("absent"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_reads_nested_files_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-a.toml", "[plan]\nid = 1\ntitle = \"a\"\n");
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        write(&dir.path().join("sub"), "2-b.toml", "[plan]\nid = 2\ntitle = \"b\"\n");
        std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        write(
            &dir.path().join(".hidden"),
            "3-c.toml",
            "[plan]\nid = 3\ntitle = \"c\"\n",
        );
        write(dir.path(), "notes.md", "not a plan");

        let mut store = PlanStore::open(dir.path());
        let set = store.load().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(2).unwrap().title, "b");
        assert!(set.get(3).is_none());
        assert_eq!(set.max_id(), 2);
    }

    #[test]
    fn malformed_file_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let bad = write(dir.path(), "1-bad.toml", "[plan]\nid = 0\ntitle = \"x\"\n");
        let mut store = PlanStore::open(dir.path());
        match store.load() {
            Err(StoreError::Validation { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn cache_is_kept_until_invalidated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-a.toml", "[plan]\nid = 1\ntitle = \"a\"\n");
        let mut store = PlanStore::open(dir.path());
        assert_eq!(store.load().unwrap().len(), 1);

        write(dir.path(), "2-b.toml", "[plan]\nid = 2\ntitle = \"b\"\n");
        assert_eq!(store.load().unwrap().len(), 1, "cached view");
        assert_eq!(store.reload().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_ids_are_all_loaded() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-a.toml", "[plan]\nid = 1\ntitle = \"a\"\n");
        write(dir.path(), "1-b.toml", "[plan]\nid = 1\ntitle = \"b\"\n");
        let mut store = PlanStore::open(dir.path());
        let set = store.load().unwrap();
        assert_eq!(set.all_with_id(1).len(), 2);
        assert_eq!(set.get(1).unwrap().title, "a");
    }

    #[test]
    fn create_assigns_next_id_and_links_parent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-parent.toml", "[plan]\nid = 1\ntitle = \"parent\"\n");
        let mut store = PlanStore::open(dir.path());

        let created = store
            .create(NewPlan {
                title: "Child work".into(),
                parent: Some(1),
                ..NewPlan::default()
            })
            .expect("create should succeed");

        assert_eq!(created.plan.id, Some(2));
        assert!(created.plan.uuid.is_some());
        assert_eq!(created.path, dir.path().join("2-child-work.toml"));

        let set = store.load().unwrap();
        assert_eq!(set.get(1).unwrap().dependencies, vec![2]);
        assert_eq!(set.get(2).unwrap().parent, Some(1));
    }

    #[test]
    fn create_with_unknown_parent_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = PlanStore::open(dir.path());
        let err = store
            .create(NewPlan {
                title: "orphan".into(),
                parent: Some(9),
                ..NewPlan::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(9)));
    }

    #[test]
    fn ensure_uuid_writes_back_once() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "1-a.toml",
            "# hand written\n[plan]\nid = 1\ntitle = \"a\"\n",
        );
        let mut store = PlanStore::open(dir.path());

        let first = store.ensure_uuid(&path).unwrap();
        let second = store.ensure_uuid(&path).unwrap();
        assert_eq!(first, second);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# hand written"));
        assert!(content.contains(&first.to_string()));
    }

    #[test]
    fn save_roundtrips_status() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "1-a.toml", "[plan]\nid = 1\ntitle = \"a\"\n");
        let mut store = PlanStore::open(dir.path());
        let mut plan = store.load().unwrap().get(1).unwrap().clone();
        plan.status = PlanStatus::Done;
        store.save(&path, &plan).unwrap();
        assert_eq!(store.load().unwrap().get(1).unwrap().status, PlanStatus::Done);
    }

    #[test]
    fn resolve_path_falls_back_to_tasks_dir() {
        let dir = TempDir::new().unwrap();
        let store = PlanStore::open(dir.path());
        assert_eq!(
            store.resolve_path(Path::new("does-not-exist-anywhere-1.toml")),
            dir.path().join("does-not-exist-anywhere-1.toml")
        );
        assert_eq!(
            store.resolve_path(Path::new("/abs/1.toml")),
            PathBuf::from("/abs/1.toml")
        );
    }
}
