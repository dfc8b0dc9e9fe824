//! Shared test utilities for plank integration tests.
//!
//! Provides throwaway git repositories and a small builder for plan files.
//! The builder emits raw TOML so tests exercise the same parser as real
//! plan files, including hand-written ones without a uuid.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Run `git` in `repo` and panic with stderr if it fails.
pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a temporary git repository on branch `main` with an initial
/// commit. Returns the TempDir (must be held alive) and the repo path.
pub fn create_temp_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    git(&repo_path, &["init", "--quiet"]);
    git(&repo_path, &["checkout", "--quiet", "-B", "main"]);
    git(&repo_path, &["config", "user.email", "test@plank.dev"]);
    git(&repo_path, &["config", "user.name", "Plank Test"]);
    git(&repo_path, &["config", "commit.gpgsign", "false"]);

    std::fs::write(repo_path.join("README.md"), "# Test repo\n")
        .expect("failed to write README");
    git(&repo_path, &["add", "."]);
    git(&repo_path, &["commit", "--quiet", "-m", "Initial commit"]);

    (dir, repo_path)
}

/// Stage everything in `repo` and commit it.
pub fn commit_all(repo: &Path, message: &str) {
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "--quiet", "--allow-empty", "-m", message]);
}

// ---------------------------------------------------------------------------
// Plan fixtures
// ---------------------------------------------------------------------------

/// Builder for a plan file's TOML text.
#[derive(Debug, Clone)]
pub struct PlanFixture {
    id: Option<u64>,
    uuid: Option<String>,
    title: String,
    status: Option<String>,
    priority: Option<String>,
    parent: Option<u64>,
    dependencies: Vec<u64>,
    created_at: Option<String>,
    tasks: Vec<(String, bool)>,
}

impl PlanFixture {
    /// A numbered plan titled `title`.
    pub fn new(id: u64, title: &str) -> Self {
        Self {
            id: Some(id),
            uuid: None,
            title: title.to_string(),
            status: None,
            priority: None,
            parent: None,
            dependencies: Vec::new(),
            created_at: None,
            tasks: Vec::new(),
        }
    }

    /// A stub plan without an id.
    pub fn stub(title: &str) -> Self {
        Self {
            id: None,
            ..Self::new(0, title)
        }
    }

    pub fn uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn priority(mut self, priority: &str) -> Self {
        self.priority = Some(priority.to_string());
        self
    }

    pub fn parent(mut self, parent: u64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn deps(mut self, deps: &[u64]) -> Self {
        self.dependencies = deps.to_vec();
        self
    }

    /// RFC 3339 creation timestamp, e.g. `"2026-01-01T00:00:00Z"`.
    pub fn created_at(mut self, ts: &str) -> Self {
        self.created_at = Some(ts.to_string());
        self
    }

    pub fn task(mut self, title: &str, done: bool) -> Self {
        self.tasks.push((title.to_string(), done));
        self
    }

    /// Render the plan file text.
    pub fn to_toml(&self) -> String {
        let mut out = String::from("[plan]\n");
        if let Some(id) = self.id {
            out.push_str(&format!("id = {id}\n"));
        }
        if let Some(ref uuid) = self.uuid {
            out.push_str(&format!("uuid = \"{uuid}\"\n"));
        }
        out.push_str(&format!("title = {:?}\n", self.title));
        if let Some(ref status) = self.status {
            out.push_str(&format!("status = \"{status}\"\n"));
        }
        if let Some(ref priority) = self.priority {
            out.push_str(&format!("priority = \"{priority}\"\n"));
        }
        if let Some(parent) = self.parent {
            out.push_str(&format!("parent = {parent}\n"));
        }
        if !self.dependencies.is_empty() {
            let deps: Vec<String> = self.dependencies.iter().map(u64::to_string).collect();
            out.push_str(&format!("dependencies = [{}]\n", deps.join(", ")));
        }
        if let Some(ref ts) = self.created_at {
            out.push_str(&format!("created_at = \"{ts}\"\n"));
        }
        for (title, done) in &self.tasks {
            out.push_str(&format!("\n[[tasks]]\ntitle = {title:?}\ndone = {done}\n"));
        }
        out
    }

    /// Write the plan into `dir` under `file_name` and return its path.
    pub fn write_as(&self, dir: &Path, file_name: &str) -> PathBuf {
        std::fs::create_dir_all(dir).expect("failed to create tasks dir");
        let path = dir.join(file_name);
        std::fs::write(&path, self.to_toml()).expect("failed to write plan fixture");
        path
    }

    /// Write the plan into `dir` as `<id>-<slug>.toml` (or `<slug>.toml`
    /// for stubs) and return its path.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let slug: String = self
            .title
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let name = match self.id {
            Some(id) => format!("{id}-{slug}.toml"),
            None => format!("{slug}.toml"),
        };
        self.write_as(dir, &name)
    }
}
