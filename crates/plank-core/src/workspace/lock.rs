//! Workspace locks.
//!
//! A lock is a small JSON record at `<workspace>/.plank/workspace.lock`
//! created with `create_new`, so exactly one process wins a race. Process
//! locks belong to a running command and die with it; persistent locks are
//! taken explicitly by a user and only expire by age.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LOCK_DIR: &str = ".plank";
pub const LOCK_FILE: &str = "workspace.lock";

/// A lock file that cannot be parsed is treated as held while younger than
/// this; its writer may still be mid-write.
const CORRUPT_GRACE: StdDuration = StdDuration::from_secs(5);

/// Age after which any lock is considered abandoned.
pub fn default_stale_after() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("workspace is locked ({})", describe_holder(info.as_deref()))]
    Held {
        path: PathBuf,
        info: Option<Box<LockInfo>>,
    },

    #[error("lock at {} is held by {holder}, not by the caller", path.display())]
    NotHolder { path: PathBuf, holder: String },

    #[error("lock file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("lock I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe_holder(info: Option<&LockInfo>) -> String {
    match info {
        Some(info) => info.describe(),
        None => "holder unknown".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Process,
    Persistent,
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub kind: LockKind,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    /// Process locks are stale once their process is gone; any lock is
    /// stale past `max_age`.
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        if now - self.acquired_at > max_age {
            return true;
        }
        match self.kind {
            LockKind::Process => !process_alive(self.pid),
            LockKind::Persistent => false,
        }
    }

    pub fn describe(&self) -> String {
        let who = self.owner.as_deref().unwrap_or("unknown");
        match self.kind {
            LockKind::Process => format!(
                "pid {} running `{}` since {}",
                self.pid, self.command, self.acquired_at
            ),
            LockKind::Persistent => format!("{who} since {}", self.acquired_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Held(LockInfo),
    Stale(LockInfo),
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub command: String,
    pub owner: Option<String>,
    pub kind: LockKind,
}

impl LockRequest {
    pub fn process(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            owner: None,
            kind: LockKind::Process,
        }
    }

    pub fn persistent(owner: impl Into<String>) -> Self {
        Self {
            command: "workspace lock".to_string(),
            owner: Some(owner.into()),
            kind: LockKind::Persistent,
        }
    }
}

/// Location of the lock file for `workspace`.
pub fn lock_path(workspace: &Path) -> PathBuf {
    workspace.join(LOCK_DIR).join(LOCK_FILE)
}

/// Read the lock record, if any.
pub fn read_lock(workspace: &Path) -> Result<Option<LockInfo>, LockError> {
    read_info(&lock_path(workspace))
}

pub fn lock_status(workspace: &Path, max_age: Duration) -> Result<LockStatus, LockError> {
    Ok(match read_lock(workspace)? {
        None => LockStatus::Unlocked,
        Some(info) if info.is_stale(max_age, Utc::now()) => LockStatus::Stale(info),
        Some(info) => LockStatus::Held(info),
    })
}

/// A held workspace lock. Dropping it removes the lock file unless
/// [`WorkspaceLock::keep`] was called.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl WorkspaceLock {
    /// Take the lock on `workspace`, reclaiming it if the current record is
    /// stale.
    pub fn acquire(
        workspace: &Path,
        request: &LockRequest,
        max_age: Duration,
    ) -> Result<Self, LockError> {
        let path = lock_path(workspace);
        ensure_lock_dir(workspace)?;

        let info = LockInfo {
            pid: std::process::id(),
            command: request.command.clone(),
            owner: request.owner.clone(),
            kind: request.kind,
            acquired_at: Utc::now(),
        };

        // One reclaim attempt; losing the race after that means someone
        // else now holds a fresh lock.
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = write_info(&mut file, &path, &info) {
                        let _ = fs::remove_file(&path);
                        return Err(e);
                    }
                    tracing::debug!(path = %path.display(), kind = ?info.kind, "acquired workspace lock");
                    return Ok(Self {
                        path,
                        info,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt > 0 || !try_reclaim(&path, max_age)? {
                        break;
                    }
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }

        let holder = read_info(&path).ok().flatten();
        Err(LockError::Held {
            path,
            info: holder.map(Box::new),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Remove the lock file if it still holds this lock's record.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match read_info(&self.path) {
            Ok(Some(current)) if current == self.info => remove_lock_file(&self.path),
            Ok(Some(current)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    holder = %current.describe(),
                    "lock was taken over, leaving it in place"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Leave the lock in place after this handle is gone.
    pub fn keep(mut self) -> LockInfo {
        self.released = true;
        self.info.clone()
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if !self.released {
            if let Ok(Some(current)) = read_info(&self.path) {
                if current == self.info {
                    let _ = fs::remove_file(&self.path);
                }
            }
        }
    }
}

/// Release a lock on behalf of its holder: the owner for persistent locks,
/// the current process for process locks. Returns whether a lock existed.
pub fn release_lock(workspace: &Path, owner: Option<&str>) -> Result<bool, LockError> {
    let path = lock_path(workspace);
    let Some(info) = read_info(&path)? else {
        return Ok(false);
    };
    let is_holder = match info.kind {
        LockKind::Persistent => info.owner.is_some() && info.owner.as_deref() == owner,
        LockKind::Process => info.pid == std::process::id(),
    };
    if !is_holder {
        return Err(LockError::NotHolder {
            path,
            holder: info.describe(),
        });
    }
    remove_lock_file(&path)?;
    tracing::info!(workspace = %workspace.display(), "released workspace lock");
    Ok(true)
}

/// Remove the lock regardless of holder. Returns the removed record, if
/// it could be read.
pub fn force_release(workspace: &Path) -> Result<Option<LockInfo>, LockError> {
    let path = lock_path(workspace);
    let info = match read_info(&path) {
        Ok(info) => info,
        Err(LockError::Corrupt { .. }) => None,
        Err(e) => return Err(e),
    };
    remove_lock_file(&path)?;
    tracing::warn!(workspace = %workspace.display(), "force-released workspace lock");
    Ok(info)
}

/// Whether a process with `pid` exists. A process owned by another user
/// (EPERM) counts as alive.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Create `.plank/` with a catch-all `.gitignore` so lock records never
/// make a checkout look dirty.
fn ensure_lock_dir(workspace: &Path) -> Result<(), LockError> {
    let dir = workspace.join(LOCK_DIR);
    let io_err = |source| LockError::Io {
        path: dir.clone(),
        source,
    };
    fs::create_dir_all(&dir).map_err(io_err)?;
    let ignore = dir.join(".gitignore");
    if !ignore.exists() {
        fs::write(&ignore, "*\n").map_err(io_err)?;
    }
    Ok(())
}

/// Remove a stale or abandoned lock file. Returns true when the caller
/// should retry `create_new`.
fn try_reclaim(path: &Path, max_age: Duration) -> Result<bool, LockError> {
    match read_info(path) {
        Ok(None) => Ok(true),
        Ok(Some(info)) => {
            if !info.is_stale(max_age, Utc::now()) {
                return Ok(false);
            }
            // Confirm nobody replaced the record between the two reads.
            if read_info(path)?.as_ref() != Some(&info) {
                return Ok(false);
            }
            tracing::warn!(path = %path.display(), holder = %info.describe(), "reclaiming stale workspace lock");
            remove_lock_file(path)?;
            Ok(true)
        }
        Err(LockError::Corrupt { .. }) => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            match age {
                Some(age) if age > CORRUPT_GRACE => {
                    tracing::warn!(path = %path.display(), "removing unreadable workspace lock");
                    remove_lock_file(path)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        Err(e) => Err(e),
    }
}

fn read_info(path: &Path) -> Result<Option<LockInfo>, LockError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| LockError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn write_info(file: &mut fs::File, path: &Path, info: &LockInfo) -> Result<(), LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(info).map_err(|source| LockError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

fn remove_lock_file(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_record(workspace: &Path, info: &LockInfo) {
        let path = lock_path(workspace);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(info).unwrap()).unwrap();
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = WorkspaceLock::acquire(dir.path(), &LockRequest::process("agent"), default_stale_after())
            .unwrap();
        assert!(lock_path(dir.path()).exists());
        assert_eq!(lock.info().pid, std::process::id());

        lock.release().unwrap();
        assert!(!lock_path(dir.path()).exists());
    }

    #[test]
    fn drop_releases_lock() {
        let dir = TempDir::new().unwrap();
        {
            let _lock =
                WorkspaceLock::acquire(dir.path(), &LockRequest::process("agent"), default_stale_after())
                    .unwrap();
            assert!(lock_path(dir.path()).exists());
        }
        assert!(!lock_path(dir.path()).exists());
    }

    #[test]
    fn live_lock_is_held() {
        let dir = TempDir::new().unwrap();
        let _first =
            WorkspaceLock::acquire(dir.path(), &LockRequest::process("agent"), default_stale_after())
                .unwrap();
        let err = WorkspaceLock::acquire(dir.path(), &LockRequest::process("other"), default_stale_after())
            .unwrap_err();
        match err {
            LockError::Held { info, .. } => {
                assert_eq!(info.unwrap().command, "agent");
            }
            other => panic!("expected Held, got {other}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn dead_process_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let stale = LockInfo {
            pid: dead_pid(),
            command: "crashed".to_string(),
            owner: None,
            kind: LockKind::Process,
            acquired_at: Utc::now(),
        };
        write_record(dir.path(), &stale);
        assert_eq!(
            lock_status(dir.path(), default_stale_after()).unwrap(),
            LockStatus::Stale(stale)
        );

        let lock = WorkspaceLock::acquire(dir.path(), &LockRequest::process("agent"), default_stale_after())
            .unwrap();
        assert_eq!(read_lock(dir.path()).unwrap().unwrap().command, "agent");
        drop(lock);
    }

    #[test]
    fn persistent_lock_expires_only_by_age() {
        let now = Utc::now();
        let mut info = LockInfo {
            pid: 999_999_999,
            command: "workspace lock".to_string(),
            owner: Some("ana".to_string()),
            kind: LockKind::Persistent,
            acquired_at: now - Duration::hours(1),
        };
        assert!(!info.is_stale(Duration::hours(24), now));
        info.acquired_at = now - Duration::hours(25);
        assert!(info.is_stale(Duration::hours(24), now));
    }

    #[test]
    fn old_process_lock_is_stale_even_if_alive() {
        let now = Utc::now();
        let info = LockInfo {
            pid: std::process::id(),
            command: "agent".to_string(),
            owner: None,
            kind: LockKind::Process,
            acquired_at: now - Duration::hours(30),
        };
        assert!(info.is_stale(Duration::hours(24), now));
    }

    #[test]
    fn kept_persistent_lock_survives_handle() {
        let dir = TempDir::new().unwrap();
        let lock = WorkspaceLock::acquire(dir.path(), &LockRequest::persistent("ana"), default_stale_after())
            .unwrap();
        lock.keep();
        let info = read_lock(dir.path()).unwrap().unwrap();
        assert_eq!(info.kind, LockKind::Persistent);

        let err = release_lock(dir.path(), Some("bo")).unwrap_err();
        assert!(matches!(err, LockError::NotHolder { .. }));
        assert!(release_lock(dir.path(), Some("ana")).unwrap());
        assert!(!release_lock(dir.path(), Some("ana")).unwrap());
    }

    #[test]
    fn force_release_ignores_holder() {
        let dir = TempDir::new().unwrap();
        WorkspaceLock::acquire(dir.path(), &LockRequest::persistent("ana"), default_stale_after())
            .unwrap()
            .keep();
        let removed = force_release(dir.path()).unwrap().unwrap();
        assert_eq!(removed.owner.as_deref(), Some("ana"));
        assert_eq!(
            lock_status(dir.path(), default_stale_after()).unwrap(),
            LockStatus::Unlocked
        );
    }

    #[test]
    fn fresh_corrupt_lock_counts_as_held() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ partial").unwrap();

        let err = WorkspaceLock::acquire(dir.path(), &LockRequest::process("agent"), default_stale_after())
            .unwrap_err();
        assert!(matches!(err, LockError::Held { info: None, .. }));
    }

    #[test]
    fn old_corrupt_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ partial").unwrap();
        let old = SystemTime::now() - StdDuration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let lock = WorkspaceLock::acquire(dir.path(), &LockRequest::process("agent"), default_stale_after())
            .unwrap();
        assert_eq!(lock.info().command, "agent");
    }
}
