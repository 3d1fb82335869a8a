use std::path::{Path, PathBuf};

use crate::commands::backup::{self, BackupOptions};
use crate::error::Result;
use crate::summary::Summary;
use crate::testutil::MemoryBackend;
use crate::walk::join_rel;

pub(crate) const TEST_NAME: &str = "test-backup";
pub(crate) const TEST_PREFIX_BASE: &str = "backups";

/// Scratch state for one backup/recover exercise: a source tree, a
/// manifest location, and an in-memory remote.
pub(crate) struct TestEnv {
    pub source: tempfile::TempDir,
    pub state: tempfile::TempDir,
    pub store: MemoryBackend,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            source: tempfile::tempdir().unwrap(),
            state: tempfile::tempdir().unwrap(),
            store: MemoryBackend::new(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state.path().join(format!("{TEST_NAME}.db"))
    }

    pub fn write_file(&self, rel: &str, size: usize) {
        write_sized(self.source.path(), rel, size);
    }

    pub fn remove_file(&self, rel: &str) {
        std::fs::remove_file(join_rel(self.source.path(), rel)).unwrap();
    }

    pub fn backup(&self, size_threshold: u64) -> Result<Summary> {
        backup::run(
            &self.store,
            &self.manifest_path(),
            self.source.path(),
            TEST_PREFIX_BASE,
            TEST_NAME,
            size_threshold,
            &BackupOptions {
                force: false,
                dry_run: false,
            },
        )
    }

    pub fn backup_with(&self, size_threshold: u64, options: &BackupOptions) -> Result<Summary> {
        backup::run(
            &self.store,
            &self.manifest_path(),
            self.source.path(),
            TEST_PREFIX_BASE,
            TEST_NAME,
            size_threshold,
            options,
        )
    }
}

/// Write `size` distinct-ish bytes at `rel` under `root`, creating
/// parent directories.
pub(crate) fn write_sized(root: &Path, rel: &str, size: usize) {
    let path = join_rel(root, rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let contents: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, contents).unwrap();
}

/// Collect every file under `root` as (relative path, contents).
pub(crate) fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    collect(root, root, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if entry.file_type().unwrap().is_dir() {
            collect(root, &path, out);
        } else {
            let rel = crate::walk::rel_path_string(root, &path).unwrap();
            out.push((rel, std::fs::read(&path).unwrap()));
        }
    }
}
