use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};

use crate::error::{DbackupError, Result};

/// List a directory's children sorted by file name, so a tree walks the
/// same way on every run.
pub fn sorted_entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Modification time as UTC wall-clock, truncated to milliseconds so a
/// fresh stat round-trips exactly through the manifest's stored format.
pub fn mod_time(meta: &fs::Metadata) -> Result<DateTime<Utc>> {
    let time: DateTime<Utc> = meta.modified()?.into();
    let millis = time.nanosecond() / 1_000_000;
    Ok(time
        .with_nanosecond(millis * 1_000_000)
        .unwrap_or(time))
}

/// Path relative to `root`, as a forward-slash string with no leading dot.
pub fn rel_path_string(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        DbackupError::Config(format!(
            "path {} is not under {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Join a forward-slash relative path onto a filesystem root. `"."` and
/// empty segments resolve to the root itself.
pub fn join_rel(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in rel.split('/') {
        if !part.is_empty() && part != "." {
            path.push(part);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_entries_orders_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let names: Vec<_> = sorted_entries(dir.path())
            .unwrap()
            .iter()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
    }

    #[test]
    fn mod_time_truncates_to_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let t = mod_time(&std::fs::metadata(&path).unwrap()).unwrap();
        assert_eq!(t.nanosecond() % 1_000_000, 0);
    }

    #[test]
    fn rel_path_uses_forward_slashes() {
        let root = Path::new("/base");
        let path = Path::new("/base/sub/dir/file.txt");
        assert_eq!(rel_path_string(root, path).unwrap(), "sub/dir/file.txt");
    }

    #[test]
    fn rel_path_rejects_outside_paths() {
        assert!(rel_path_string(Path::new("/base"), Path::new("/other/f")).is_err());
    }

    #[test]
    fn join_rel_handles_dot_root() {
        let root = Path::new("/base");
        assert_eq!(join_rel(root, "."), PathBuf::from("/base"));
        assert_eq!(join_rel(root, "sub/f.txt"), PathBuf::from("/base/sub/f.txt"));
    }
}
