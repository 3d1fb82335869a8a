use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{DbackupError, Result};
use crate::storage::ObjectStore;

/// Object store over a local directory, used for tests and
/// filesystem-backed targets. The bucket is the root directory itself.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory path. The directory
    /// is not created; `head_bucket` reports whether it exists.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Reject storage keys that could escape the root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(DbackupError::Config("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(DbackupError::Config(format!(
                "unsafe storage key: absolute path '{key}'"
            )));
        }
        if key.contains('\\') {
            return Err(DbackupError::Config(format!(
                "unsafe storage key: contains backslash '{key}'"
            )));
        }
        for component in Path::new(key).components() {
            if component == Component::ParentDir {
                return Err(DbackupError::Config(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a `/`-separated storage key to a filesystem path under the root.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim_end_matches('/');
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Recursively list all files under `dir`, adding their paths relative
    /// to `self.root` as `/`-separated keys.
    fn list_recursive(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.list_recursive(&entry.path(), keys)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.resolve(key)?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn head_bucket(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(DbackupError::Remote(format!(
                "bucket directory does not exist: {}",
                self.root.display()
            )))
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let mut keys = Vec::new();
                self.list_recursive(&dir, &mut keys)?;
                keys.sort();
                Ok(keys)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_rejects_unsafe_keys() {
        assert!(LocalBackend::validate_key("/etc/passwd").is_err());
        assert!(LocalBackend::validate_key("../../outside").is_err());
        assert!(LocalBackend::validate_key("foo/../../etc/passwd").is_err());
        assert!(LocalBackend::validate_key("foo\\bar").is_err());
        assert!(LocalBackend::validate_key("").is_err());
    }

    #[test]
    fn validate_key_accepts_safe_keys() {
        assert!(LocalBackend::validate_key("backups/abc/a.txt.tar.gz").is_ok());
        assert!(LocalBackend::validate_key("backups/abc/_files.tar.gz").is_ok());
        assert!(LocalBackend::validate_key("backups/abc.db.gz").is_ok());
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert!(backend.get("no_such_key").unwrap().is_none());
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.put("a/b/c.bin", b"hello").unwrap();
        assert_eq!(backend.get("a/b/c.bin").unwrap().unwrap(), b"hello");
        backend.delete(&["a/b/c.bin".to_string()]).unwrap();
        assert!(backend.get("a/b/c.bin").unwrap().is_none());
        // Deleting a missing key is not an error.
        backend.delete(&["a/b/c.bin".to_string()]).unwrap();
    }

    #[test]
    fn list_returns_keys_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        backend.put("backups/x/a.txt.tar.gz", b"1").unwrap();
        backend.put("backups/x/sub/_files.tar.gz", b"2").unwrap();
        backend.put("backups/y/other.tar.gz", b"3").unwrap();

        let keys = backend.list("backups/x/").unwrap();
        assert_eq!(
            keys,
            vec![
                "backups/x/a.txt.tar.gz".to_string(),
                "backups/x/sub/_files.tar.gz".to_string(),
            ]
        );
    }

    #[test]
    fn list_returns_empty_for_missing_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        assert!(backend.list("nothing/").unwrap().is_empty());
    }

    #[test]
    fn head_bucket_checks_root_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(&dir.path().join("missing"));
        assert!(backend.head_bucket().is_err());
        let backend = LocalBackend::new(dir.path());
        assert!(backend.head_bucket().is_ok());
    }
}
