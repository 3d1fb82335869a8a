use std::path::Path;

use tracing::{debug, info, warn};

use crate::archive;
use crate::change::{self, FileOp};
use crate::error::{DbackupError, Result};
use crate::hash;
use crate::manifest::{BatchMeta, Manifest};
use crate::planner::{self, BackupBatch};
use crate::storage::ObjectStore;
use crate::summary::Summary;
use crate::walk;

use super::util;

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Proceed even when the remote manifest has drifted from the local one.
    pub force: bool,
    /// Plan and log, but write nothing locally or remotely.
    pub dry_run: bool,
}

/// Run a backup of `root` into `<prefix_base>/<name>/`.
///
/// The pipeline is: reconcile the remote manifest, plan batches, delete
/// stale remote batches, upload dirty batches, persist the manifest.
/// There is no rollback; the manifest records only successful uploads,
/// so a failed run re-converges on the next invocation.
pub fn run(
    store: &dyn ObjectStore,
    manifest_path: &Path,
    root: &Path,
    prefix_base: &str,
    name: &str,
    size_threshold: u64,
    options: &BackupOptions,
) -> Result<Summary> {
    let prefix = format!("{prefix_base}/{name}");
    info!("using remote prefix: {prefix}");
    debug!("size threshold: {size_threshold}");

    // Compare against the remote manifest before opening the exclusive
    // session for this run; the compare needs its own read sessions.
    let changes = util::download_and_compare(store, manifest_path, prefix_base, name)?;
    if !changes.is_empty() {
        if options.force {
            warn!("forcing backup despite changes in storage:");
            for change in &changes {
                warn!("  {change}");
            }
        } else {
            return Err(DbackupError::RemoteDriftDetected(changes));
        }
    }

    let manifest = Manifest::open(manifest_path)?;

    // The root is user input; resolve `.` and `..` before planning.
    let root = root.canonicalize()?;

    info!("> Scanning files");
    let mut summary = Summary::default();
    let batches = planner::plan(&manifest, &root, size_threshold, &mut summary)?;
    let batches_to_delete = planner::batches_to_delete(&manifest, &batches)?;

    // Anything tracked but no longer planned was deleted locally.
    for path in planner::files_not_in_batches(&manifest, &batches)? {
        summary.record(&path, FileOp::Remove);
    }
    info!("< Scanning files");

    summary.print();

    debug!("> Found batches");
    for batch in &batches {
        debug!("batch {:?} ({} bytes)", batch.root, batch.total_size);
        for file in &batch.files {
            let dirty = if file.dirty { "[dirty] " } else { "" };
            debug!("  {dirty}{} ({} bytes)", file.path, file.size);
        }
    }
    debug!("batches to delete:");
    for batch in &batches_to_delete {
        debug!("  {:?} (single file: {})", batch.path, batch.is_single_file);
    }
    debug!("< Found batches");

    // Fail fast on a misconfigured remote before touching anything.
    store.head_bucket()?;

    info!("> Backing up files");

    // Delete stale batches first, as a precaution: if an upload later
    // fails, nothing still wanted has been removed.
    debug!(">> Clearing stale batches");
    for batch in &batches_to_delete {
        delete_batch(&manifest, store, &prefix, batch, options.dry_run)?;
    }
    debug!("<< Clearing stale batches");

    debug!(">> Backing up batches");
    for batch in &batches {
        backup_batch(&manifest, store, &root, &prefix, batch, options.dry_run)?;
    }
    debug!("<< Backing up batches");
    info!("< Backing up files");

    manifest.close()?;

    if !options.dry_run {
        info!("> Backing up manifest");
        util::upload_manifest(store, manifest_path, prefix_base, name)?;
        info!("< Backing up manifest");
    }

    Ok(summary)
}

/// Remove one stale batch from the remote and from the manifest. The
/// remote delete comes first so a failure leaves the manifest still
/// pointing at whatever survived.
fn delete_batch(
    manifest: &Manifest,
    store: &dyn ObjectStore,
    prefix: &str,
    batch: &BatchMeta,
    dry_run: bool,
) -> Result<()> {
    let key = util::batch_key(prefix, &batch.path, batch.is_single_file);

    if dry_run {
        info!("dry run, would have deleted remote object {key:?}");
        return Ok(());
    }

    debug!("deleting remote object {key:?}");
    store.delete(&[key])?;

    debug!("deleting batch from manifest: {:?}", batch.path);
    for file in manifest.files_in_batch(&batch.path)? {
        debug!("  {file}");
    }
    manifest.delete_by_batch(&batch.path)
}

/// Upload one planned batch if anything in it needs uploading.
fn backup_batch(
    manifest: &Manifest,
    store: &dyn ObjectStore,
    root: &Path,
    prefix: &str,
    batch: &BackupBatch,
    dry_run: bool,
) -> Result<()> {
    if batch.files.is_empty() {
        return Ok(());
    }

    // A clean file still forces an upload when the planner moved it to a
    // different batch, so the remote layout matches the plan.
    let mut any_dirty = false;
    for file in &batch.files {
        if file.dirty {
            any_dirty = true;
        } else if change::batch_changed(manifest, &file.path, &batch.root)? {
            debug!("file {:?} has changed batches", file.path);
            any_dirty = true;
        }
    }
    if !any_dirty {
        debug!("no dirty files in batch, skipping: {:?}", batch.root);
        return Ok(());
    }

    if dry_run {
        info!("dry run, would have backed up batch {:?}, files:", batch.root);
        for file in &batch.files {
            info!("  {}", file.path);
        }
        return Ok(());
    }

    if batch.files.len() > 1 {
        let files: Vec<String> = batch.files.iter().map(|f| f.path.clone()).collect();
        debug!("backing up file batch: {:?}, files: {files:?}", batch.root);

        let key = util::batch_key(prefix, &batch.root, false);
        let blob = archive::archive(root, &batch.root, &files)?;
        store.put(&key, &blob)?;
        for file in &files {
            mark_file(manifest, root, file, &batch.root)?;
        }
    } else {
        let file_path = &batch.files[0].path;
        debug!("backing up file: {file_path:?}");

        let key = util::batch_key(prefix, file_path, true);
        let blob = archive::archive(root, parent_dir(file_path), std::slice::from_ref(file_path))?;
        store.put(&key, &blob)?;
        // batch == path marks a file that was backed up individually.
        mark_file(manifest, root, file_path, file_path)?;
    }
    Ok(())
}

/// Record a file's just-uploaded state: fresh stat, fresh hash.
fn mark_file(manifest: &Manifest, root: &Path, rel_path: &str, batch: &str) -> Result<()> {
    let abs = walk::join_rel(root, rel_path);
    let mod_time = walk::mod_time(&std::fs::metadata(&abs)?)?;
    let digest = hash::file_digest(&abs)?;
    manifest.upsert(rel_path, mod_time, &digest, batch)
}

/// Directory part of a relative path, `"."` at the top level.
fn parent_dir(rel_path: &str) -> &str {
    match rel_path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_nested_and_top_level_paths() {
        assert_eq!(parent_dir("a.txt"), ".");
        assert_eq!(parent_dir("sub/a.txt"), "sub");
        assert_eq!(parent_dir("sub/deep/a.txt"), "sub/deep");
    }
}
