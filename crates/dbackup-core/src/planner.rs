use std::path::Path;

use tracing::{debug, trace};

use crate::change;
use crate::error::Result;
use crate::manifest::{Manifest, MANIFEST_BASENAME};
use crate::summary::Summary;
use crate::walk;

/// One file inside a planned batch. `path` is relative to the backup
/// root, forward-slash separated.
#[derive(Debug, Clone)]
pub struct BackupFile {
    pub path: String,
    pub size: u64,
    pub dirty: bool,
}

/// A planned unit of upload: either a directory rollup or a lone file.
///
/// For multi-file batches `root` is the containing directory relative to
/// the backup root (`"."` at the top). For a single-file batch it is the
/// file's own path, which doubles as the "backed up individually" marker
/// in the manifest.
#[derive(Debug, Clone)]
pub struct BackupBatch {
    pub root: String,
    pub total_size: u64,
    pub files: Vec<BackupFile>,
}

/// Partition the tree under `root` into batches no larger than
/// `size_threshold`, splitting out oversized files individually and
/// rolling small subtrees up into their parent. Every visited file's op
/// is recorded in `summary`.
pub fn plan(
    manifest: &Manifest,
    root: &Path,
    size_threshold: u64,
    summary: &mut Summary,
) -> Result<Vec<BackupBatch>> {
    plan_dir(manifest, root, root, size_threshold, summary)
}

/// Depth-first recursion over one directory.
///
/// Subdirectory plans that came back as a single batch are candidates for
/// merging into this level; plans that were already split cannot shrink
/// and pass through untouched.
fn plan_dir(
    manifest: &Manifest,
    root: &Path,
    search_dir: &Path,
    size_threshold: u64,
    summary: &mut Summary,
) -> Result<Vec<BackupBatch>> {
    let mut dir_files: Vec<BackupFile> = Vec::new();
    let mut maybe_rollup_batches: Vec<BackupBatch> = Vec::new();
    let mut other_batches: Vec<BackupBatch> = Vec::new();

    for entry in walk::sorted_entries(search_dir)? {
        let path = entry.path();
        trace!("scanning path {:?}", path);

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let sub_batches = plan_dir(manifest, root, &path, size_threshold, summary)?;
            if sub_batches.len() > 1 {
                other_batches.extend(sub_batches);
            } else {
                maybe_rollup_batches.extend(sub_batches);
            }
        } else if file_type.is_file() {
            if path.file_name().is_some_and(|n| n == MANIFEST_BASENAME) {
                trace!("skipping manifest file {:?}", path);
                continue;
            }
            let rel_path = walk::rel_path_string(root, &path)?;
            let (dirty, op, reason) = change::classify(manifest, &rel_path, &path)?;
            summary.record(&rel_path, op);
            let size = entry.metadata()?.len();
            trace!("  found file {rel_path:?} (dirty: {dirty}, op: {op:?}, reason: {reason:?})");
            dir_files.push(BackupFile {
                path: rel_path,
                size,
                dirty,
            });
        }
        // Symlinks and special files are out of scope.
    }

    // Special case: a lone rollup candidate from below and nothing at
    // this level bubbles up unchanged, keeping its original root.
    if dir_files.is_empty() && other_batches.is_empty() && maybe_rollup_batches.len() == 1 {
        debug!(
            "bubbling up single batch {:?}",
            maybe_rollup_batches[0].root
        );
        return Ok(maybe_rollup_batches);
    }

    let relative_root = if search_dir == root {
        ".".to_string()
    } else {
        walk::rel_path_string(root, search_dir)?
    };

    let mut output_batches: Vec<BackupBatch> = Vec::new();

    // Phase A: batch the files at this directory's own level.
    if !dir_files.is_empty() {
        let mut sum: u64 = dir_files.iter().map(|f| f.size).sum();
        if sum <= size_threshold {
            output_batches.push(make_batch(&relative_root, dir_files, sum));
        } else {
            // Pop the largest files off as their own batches until the
            // remainder fits.
            dir_files.sort_by(|a, b| b.size.cmp(&a.size));
            let mut rest = dir_files;
            while sum > size_threshold && !rest.is_empty() {
                let largest = rest.remove(0);
                sum -= largest.size;
                output_batches.push(BackupBatch {
                    root: largest.path.clone(),
                    total_size: largest.size,
                    files: vec![largest],
                });
            }
            if !rest.is_empty() {
                output_batches.push(make_batch(&relative_root, rest, sum));
            }
        }
    }

    // Phase B: if nothing here forced a split, try absorbing the
    // subdirectory batches into one batch rooted at this level.
    if output_batches.len() <= 1 && !maybe_rollup_batches.is_empty() && other_batches.is_empty() {
        let mut total_size: u64 = maybe_rollup_batches.iter().map(|b| b.total_size).sum();
        if let Some(batch) = output_batches.first() {
            total_size += batch.total_size;
        }
        if total_size <= size_threshold {
            let mut all_files = output_batches
                .pop()
                .map(|b| b.files)
                .unwrap_or_default();
            for batch in maybe_rollup_batches {
                all_files.extend(batch.files);
            }
            return Ok(vec![BackupBatch {
                root: relative_root,
                total_size,
                files: all_files,
            }]);
        }
    }

    // The tree at this level exceeds the threshold; pass the
    // subdirectory batches through as they are.
    output_batches.extend(other_batches);
    output_batches.extend(maybe_rollup_batches);
    Ok(output_batches)
}

/// A remainder of exactly one file becomes a single-file batch rooted at
/// the file itself.
fn make_batch(relative_root: &str, files: Vec<BackupFile>, total_size: u64) -> BackupBatch {
    let root = if files.len() == 1 {
        files[0].path.clone()
    } else {
        relative_root.to_string()
    };
    BackupBatch {
        root,
        total_size,
        files,
    }
}

/// Batches recorded in the manifest but absent from the plan; their
/// remote archives are stale.
pub fn batches_to_delete(
    manifest: &Manifest,
    batches: &[BackupBatch],
) -> Result<Vec<crate::manifest::BatchMeta>> {
    let planned: std::collections::HashSet<&str> =
        batches.iter().map(|b| b.root.as_str()).collect();
    Ok(manifest
        .batches(false)?
        .into_iter()
        .filter(|meta| !planned.contains(meta.path.as_str()))
        .collect())
}

/// Manifest paths that appear in no planned batch: files deleted locally
/// since the last run.
pub fn files_not_in_batches(manifest: &Manifest, batches: &[BackupBatch]) -> Result<Vec<String>> {
    let planned: std::collections::HashSet<&str> = batches
        .iter()
        .flat_map(|b| b.files.iter().map(|f| f.path.as_str()))
        .collect();
    Ok(manifest
        .all_records()?
        .into_iter()
        .filter(|record| !planned.contains(record.path.as_str()))
        .map(|record| record.path)
        .collect())
}
