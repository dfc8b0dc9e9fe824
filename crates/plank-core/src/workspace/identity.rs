//! Repository identity.
//!
//! Several clones of one repository must agree on who holds which plan, so
//! claims are partitioned by an id derived from the `origin` remote. A
//! repository without a remote falls back to a fingerprint of its path.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::vcs::{Vcs, VcsError};

/// Stable identifier of a logical repository, e.g. `github.com/acme/widgets`
/// or `local-3f2a9c0d1b7e4a55`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Wrap an already normalized id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity from a remote URL.
    pub fn from_remote(url: &str) -> Self {
        Self(normalize_remote_url(url))
    }

    /// Identity from a local path (no remote configured).
    pub fn from_local_path(path: &Path) -> Self {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        Self(format!("local-{}", &hex::encode(digest)[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-name-safe form used for per-repository storage.
    ///
    /// The readable part replaces unsafe characters with `_`; the hash
    /// suffix keeps ids that sanitize alike (`a/b` and `a_b`) apart.
    pub fn storage_key(&self) -> String {
        let readable: String = self
            .0
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{readable}-{}", &hex::encode(digest)[..8])
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Determine the identity of the repository containing `dir`.
pub fn repository_id(vcs: &dyn Vcs, dir: &Path) -> Result<RepositoryId, VcsError> {
    let root = vcs.repo_root(dir)?;
    match vcs.remote_url(&root)? {
        Some(url) => Ok(RepositoryId::from_remote(&url)),
        None => Ok(RepositoryId::from_local_path(&root)),
    }
}

/// Reduce a remote URL to `host/path`: scheme, credentials, port, and a
/// trailing `.git` are dropped and the host is lowercased.
///
/// Handles `https://user@host:443/owner/repo.git`,
/// `ssh://git@host/owner/repo`, and scp-like `git@host:owner/repo.git`.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();

    let (host_part, path_part) = if let Some((_, rest)) = url.split_once("://") {
        match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        }
    } else if let Some((authority, path)) = url.split_once(':') {
        // scp-like syntax: [user@]host:path
        (authority, path)
    } else {
        return strip_git_suffix(url.trim_end_matches('/')).to_string();
    };

    let host = host_part.rsplit('@').next().unwrap_or(host_part);
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let path = strip_git_suffix(path_part.trim_matches('/'));

    if path.is_empty() {
        host
    } else {
        format!("{host}/{path}")
    }
}

fn strip_git_suffix(s: &str) -> &str {
    s.strip_suffix(".git").unwrap_or(s)
}
