//! Atomic file replacement.
//!
//! Every persisted document (plan files, claim store, workspace registry) is
//! written to a temporary file in the destination directory and renamed into
//! place, so a failed write leaves the previous contents intact.

use std::io::{self, Write};
use std::path::Path;

/// Write `contents` to `path` atomically.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write `contents` to `new_path` atomically, then remove `old_path` if it
/// differs. If the write fails, `old_path` is untouched.
pub fn replace_and_rename(old_path: &Path, new_path: &Path, contents: &[u8]) -> io::Result<()> {
    write_atomic(new_path, contents)?;
    if old_path != new_path {
        match std::fs::remove_file(old_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.txt");

        write_atomic(&path, b"first").expect("first write");
        write_atomic(&path, b"second").expect("second write");

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        // No stray temp files remain.
        let count = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[test]
    fn replace_and_rename_moves_contents() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("2-a.toml");
        let new = dir.path().join("5-a.toml");
        std::fs::write(&old, "old").unwrap();

        replace_and_rename(&old, &new, b"new").expect("rename");

        assert!(!old.exists());
        assert_eq!(std::fs::read_to_string(&new).unwrap(), "new");
    }

    #[test]
    fn failed_write_leaves_original() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("1-a.toml");
        std::fs::write(&old, "original").unwrap();
        // A directory in the way makes the rename fail.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir_all(blocked.join("inner")).unwrap();

        let result = replace_and_rename(&old, &blocked, b"new");
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&old).unwrap(), "original");
    }
}
