//! File-based storage backend for durable storage.

use crate::backend::{validate_key, KeyValueBackend};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Suffix of in-progress writes. `~` is never valid in a key, so temp files
/// are never listed as keys.
const TEMP_SUFFIX: &str = "~tmp";

/// A directory-backed key-value backend.
///
/// Each key is stored in its own file inside the directory. Writes go to a
/// temporary sibling first and are renamed into place, so a crash leaves
/// either the old or the new value, never a torn one.
///
/// # Example
///
/// ```no_run
/// use tasksync_storage::{KeyValueBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("tasksync-data")).unwrap();
/// backend.write("tasks", b"[]").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    // Serializes writers so two temp files for one key never race.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Opens or creates a file backend rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the backing directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueBackend for FileBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let target = self.key_path(key);
        let temp = self.dir.join(format!("{key}{TEMP_SUFFIX}"));
        {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn clear(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store");

        let backend = FileBackend::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(backend.path(), path.as_path());
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("tasks", b"hello").unwrap();
        assert_eq!(backend.read("tasks").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(backend.read("missing").unwrap(), None);
    }

    #[test]
    fn file_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.write("sync", b"{\"a\":1}").unwrap();
        }
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("sync").unwrap(), Some(b"{\"a\":1}".to_vec()));
    }

    #[test]
    fn file_overwrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("k", b"first").unwrap();
        backend.write("k", b"second").unwrap();

        assert_eq!(backend.read("k").unwrap(), Some(b"second".to_vec()));
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["k".to_string()]);
    }

    #[test]
    fn file_clear_missing_key_succeeds() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.clear("nothing").unwrap();

        backend.write("k", b"v").unwrap();
        backend.clear("k").unwrap();
        assert_eq!(backend.read("k").unwrap(), None);
    }

    #[test]
    fn file_keys_skip_foreign_entries() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.write("b", b"").unwrap();
        backend.write("a", b"").unwrap();
        fs::write(dir.path().join("stale~tmp"), b"").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn file_rejects_traversal() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.write("..", b"x").is_err());
        assert!(backend.read("../x").is_err());
    }
}
