use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::archive;
use crate::error::{DbackupError, Result};
use crate::manifest::{FileRecord, Manifest};
use crate::storage::ObjectStore;

/// Remote key of the compressed manifest. It lives beside the backup's
/// prefix, not under it, so recovery's object listing never sees it.
pub(super) fn manifest_key(prefix_base: &str, name: &str) -> String {
    format!("{prefix_base}/{name}.db.gz")
}

/// Download the remote manifest and diff it against the local one.
///
/// Returns one human-readable line per difference. An absent local
/// manifest (first run on this machine) or absent remote manifest (first
/// backup ever) compares clean.
pub(super) fn download_and_compare(
    store: &dyn ObjectStore,
    manifest_path: &Path,
    prefix_base: &str,
    name: &str,
) -> Result<Vec<String>> {
    if !manifest_path.exists() {
        return Ok(Vec::new());
    }

    let key = manifest_key(prefix_base, name);
    let Some(bytes) = store.get(&key)? else {
        debug!("no remote manifest at {key:?}; treating as fresh backup");
        return Ok(Vec::new());
    };

    let scratch = tempfile::tempdir()?;
    let remote_path = scratch.path().join(format!("{name}.db"));
    archive::gunzip_to_file(&bytes, &remote_path)?;
    debug!("downloaded remote manifest to {:?}", remote_path);

    let local = Manifest::open(manifest_path)?;
    let remote = Manifest::open(&remote_path)?;
    let changes = compare_manifests(&local, &remote)?;
    local.close()?;
    remote.close()?;
    Ok(changes)
}

/// Field-by-field diff of two manifests, ordered by path.
fn compare_manifests(local: &Manifest, remote: &Manifest) -> Result<Vec<String>> {
    let local_records: BTreeMap<String, FileRecord> = local
        .all_records()?
        .into_iter()
        .map(|r| (r.path.clone(), r))
        .collect();
    let remote_records: BTreeMap<String, FileRecord> = remote
        .all_records()?
        .into_iter()
        .map(|r| (r.path.clone(), r))
        .collect();

    let mut changes = Vec::new();

    for (path, local_record) in &local_records {
        let Some(remote_record) = remote_records.get(path) else {
            changes.push(format!("{path:?} not found in remote manifest"));
            continue;
        };
        if local_record.mod_time != remote_record.mod_time {
            changes.push(format!(
                "{path:?} has different mod time in local and remote manifest"
            ));
        }
        if local_record.hash != remote_record.hash {
            changes.push(format!(
                "{path:?} has different hash in local and remote manifest"
            ));
        }
        if local_record.batch != remote_record.batch {
            changes.push(format!(
                "{path:?} has different batch in local and remote manifest"
            ));
        }
    }

    for path in remote_records.keys() {
        if !local_records.contains_key(path) {
            changes.push(format!("{path:?} not found in local manifest"));
        }
    }

    Ok(changes)
}

/// Download the remote manifest into `manifest_path`, overwriting; this
/// becomes the local state for the next operation.
pub(super) fn adopt_remote_manifest(
    store: &dyn ObjectStore,
    manifest_path: &Path,
    prefix_base: &str,
    name: &str,
) -> Result<()> {
    let key = manifest_key(prefix_base, name);
    let bytes = store
        .get(&key)?
        .ok_or_else(|| DbackupError::Remote(format!("remote manifest not found: {key}")))?;
    if let Some(parent) = manifest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    archive::gunzip_to_file(&bytes, manifest_path)
}

/// Gzip the (closed) manifest file and upload it beside the prefix.
pub(super) fn upload_manifest(
    store: &dyn ObjectStore,
    manifest_path: &Path,
    prefix_base: &str,
    name: &str,
) -> Result<()> {
    let bytes = archive::gzip_file(manifest_path)?;
    store.put(&manifest_key(prefix_base, name), &bytes)
}

/// Remote key of a batch archive: `<path>.tar.gz` for a single file,
/// `<path>/_files.tar.gz` for a directory (`_files.tar.gz` at the prefix
/// root when the batch covers `"."`).
pub(super) fn batch_key(prefix: &str, batch_path: &str, is_single_file: bool) -> String {
    if is_single_file {
        format!("{prefix}/{batch_path}.tar.gz")
    } else if batch_path == "." {
        format!("{prefix}/_files.tar.gz")
    } else {
        format!("{prefix}/{batch_path}/_files.tar.gz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn batch_keys_cover_all_layouts() {
        assert_eq!(
            batch_key("backups/x", "a.txt", true),
            "backups/x/a.txt.tar.gz"
        );
        assert_eq!(
            batch_key("backups/x", "sub/dir", false),
            "backups/x/sub/dir/_files.tar.gz"
        );
        assert_eq!(batch_key("backups/x", ".", false), "backups/x/_files.tar.gz");
    }

    #[test]
    fn manifest_key_sits_beside_prefix() {
        assert_eq!(manifest_key("backups", "abc123"), "backups/abc123.db.gz");
    }

    #[test]
    fn compare_reports_every_difference() {
        let dir = tempfile::tempdir().unwrap();
        let local = Manifest::open(&dir.path().join("local.db")).unwrap();
        let remote = Manifest::open(&dir.path().join("remote.db")).unwrap();
        let now = Utc::now();

        local.upsert("same.txt", now, "aaaa", ".").unwrap();
        remote.upsert("same.txt", now, "aaaa", ".").unwrap();

        local.upsert("hash.txt", now, "1111", ".").unwrap();
        remote.upsert("hash.txt", now, "2222", ".").unwrap();

        local.upsert("local-only.txt", now, "aaaa", ".").unwrap();
        remote.upsert("remote-only.txt", now, "aaaa", ".").unwrap();

        let changes = compare_manifests(&local, &remote).unwrap();
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().any(|c| c.contains("hash.txt")));
        assert!(changes
            .iter()
            .any(|c| c.contains("local-only.txt") && c.contains("not found in remote")));
        assert!(changes
            .iter()
            .any(|c| c.contains("remote-only.txt") && c.contains("not found in local")));
    }
}
