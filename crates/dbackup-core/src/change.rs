use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::hash;
use crate::manifest::Manifest;
use crate::walk;

/// What a backup run will do with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    None,
    Add,
    Change,
    Remove,
}

/// Why a file was marked dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyReason {
    None,
    New,
    ModTime,
    Hash,
}

/// Decide whether `rel_path` needs a re-upload.
///
/// When a record exists the hash is always computed; the manifest's mod
/// time alone is not trusted. Mod times only compare reliably to the
/// second.
pub fn classify(
    manifest: &Manifest,
    rel_path: &str,
    abs_path: &Path,
) -> Result<(bool, FileOp, DirtyReason)> {
    let Some(record) = manifest.get(rel_path)? else {
        return Ok((true, FileOp::Add, DirtyReason::New));
    };

    let mod_time = walk::mod_time(&std::fs::metadata(abs_path)?)?;
    let mod_time_changed = mod_time.timestamp() != record.mod_time.timestamp();

    let hash = hash::file_digest(abs_path)?;
    let hash_changed = hash != record.hash;

    // Only hold off on a file whose mod time and hash both match;
    // otherwise prefer uploading duplicate data over missing a change.
    if !mod_time_changed && !hash_changed {
        return Ok((false, FileOp::None, DirtyReason::None));
    }

    // A changed hash almost always moves the mod time too, so report the
    // hash as the reason when both differ.
    if hash_changed {
        return Ok((true, FileOp::Change, DirtyReason::Hash));
    }
    debug!(
        "file {rel_path:?} has changed modtime: {} -> {}",
        record.mod_time, mod_time
    );
    Ok((true, FileOp::Change, DirtyReason::ModTime))
}

/// True when the manifest assigns `rel_path` to a batch other than
/// `batch_root`. A missing record counts as changed; the caller marks
/// such files new anyway.
pub fn batch_changed(manifest: &Manifest, rel_path: &str, batch_root: &str) -> Result<bool> {
    Ok(match manifest.get(rel_path)? {
        Some(record) => record.batch != batch_root,
        None => true,
    })
}
