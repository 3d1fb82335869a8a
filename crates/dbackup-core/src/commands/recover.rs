use std::path::Path;

use tracing::{debug, info, warn};

use crate::archive;
use crate::error::{DbackupError, Result};
use crate::storage::ObjectStore;

use super::util;

#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Proceed even when the remote manifest has drifted from the local one.
    pub force: bool,
}

/// Recover the backup `<prefix_base>/<name>/` into `dest`.
///
/// Downloads every object under the prefix, extracting batch archives in
/// place so the tree comes back with its original layout and mod times.
/// The remote manifest is adopted as the local one, so the next backup
/// run compares against the recovered state.
pub fn run(
    store: &dyn ObjectStore,
    manifest_path: &Path,
    prefix_base: &str,
    name: &str,
    dest: &Path,
    options: &RecoverOptions,
) -> Result<()> {
    if prefix_base.is_empty() || name.is_empty() {
        return Err(DbackupError::Config(
            "remote key prefix and backup name are required".into(),
        ));
    }
    let prefix = format!("{prefix_base}/{name}");

    let changes = util::download_and_compare(store, manifest_path, prefix_base, name)?;
    if !changes.is_empty() {
        if options.force {
            warn!("forcing recovery despite changes in storage:");
            for change in &changes {
                warn!("  {change}");
            }
        } else {
            return Err(DbackupError::RemoteDriftDetected(changes));
        }
    }

    let key_prefix = format!("{prefix}/");
    info!("> Recovering files from {key_prefix}");

    // Adopt the remote manifest so the next operation compares cleanly.
    util::adopt_remote_manifest(store, manifest_path, prefix_base, name)?;
    debug!("downloaded remote manifest to {:?}", manifest_path);

    for key in store.list(&key_prefix)? {
        let Some(rel) = key.strip_prefix(&key_prefix) else {
            continue;
        };
        let local_path = crate::walk::join_rel(dest, rel);
        debug!("downloading {key:?} to {:?}", local_path);

        let bytes = store
            .get(&key)?
            .ok_or_else(|| DbackupError::Remote(format!("object vanished during recovery: {key}")))?;
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&local_path, &bytes)?;

        if key.ends_with(".tar.gz") {
            let parent = local_path
                .parent()
                .ok_or_else(|| DbackupError::Config(format!("archive has no parent: {key}")))?;
            debug!("extracting archive {:?}", local_path);
            archive::extract(&local_path, parent)?;
            std::fs::remove_file(&local_path)?;
        }
    }

    info!("< Recovering files");
    Ok(())
}
