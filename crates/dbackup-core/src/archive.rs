use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::EntryType;

use crate::error::{DbackupError, Result};
use crate::walk;

/// Build a gzip-compressed TAR of `files` (paths relative to
/// `local_root`), with entry names relative to `local_root/batch_root`.
///
/// Entries are written with a PAX `mtime` record so sub-second
/// modification times survive the round trip; recovery relies on mod
/// times to agree with the manifest. The whole archive is buffered in
/// memory before upload.
pub fn archive(local_root: &Path, batch_root: &str, files: &[String]) -> Result<Vec<u8>> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);

    for file in files {
        let entry_name = entry_name_for(batch_root, file);
        let abs = walk::join_rel(local_root, file);
        tracing::debug!("  archiving file {file:?} as {entry_name:?}");
        append_file(&mut builder, &abs, &entry_name)?;
    }

    let gz = builder.into_inner()?;
    Ok(gz.finish()?)
}

/// Entry name for a member: its path relative to the batch root.
fn entry_name_for(batch_root: &str, file: &str) -> String {
    if batch_root == "." {
        return file.to_string();
    }
    file.strip_prefix(&format!("{batch_root}/"))
        .unwrap_or(file)
        .to_string()
}

fn append_file<W: Write>(builder: &mut tar::Builder<W>, abs: &Path, entry_name: &str) -> Result<()> {
    let mut file = File::open(abs)?;
    let meta = file.metadata()?;

    let mtime = FileTime::from_system_time(meta.modified()?);
    let pax_mtime = format!("{}.{:09}", mtime.unix_seconds(), mtime.nanoseconds());
    builder.append_pax_extensions([("mtime", pax_mtime.as_bytes())])?;

    let mut header = tar::Header::new_ustar();
    header.set_metadata_in_mode(&meta, tar::HeaderMode::Complete);
    builder.append_data(&mut header, entry_name, &mut file)?;
    Ok(())
}

/// Unpack a gzip'd TAR at `archive_path` into `dest_dir`.
///
/// Directories are created with mode 0755; regular files get the mode
/// from their header and have their mod time restored after the write.
/// Unknown entry types are ignored.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let gz = GzDecoder::new(file);
    let mut tar = tar::Archive::new(gz);

    for entry in tar.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let rel = entry.path().map_err(corrupt)?.into_owned();
        let target = dest_dir.join(&rel);
        tracing::debug!("extracting {:?}", target);

        match entry.header().entry_type() {
            EntryType::Directory => {
                if !target.is_dir() {
                    fs::create_dir_all(&target)?;
                    set_mode(&target, 0o755);
                }
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    if !parent.is_dir() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let mode = entry.header().mode().map_err(corrupt)?;
                let mtime = entry_mtime(&mut entry)?;
                let mut out = File::create(&target)?;
                io::copy(&mut entry, &mut out)?;
                drop(out);
                set_mode(&target, mode);
                filetime::set_file_mtime(&target, mtime)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Entry mod time: PAX record when present (sub-second), else the
/// integer header field.
fn entry_mtime<R: Read>(entry: &mut tar::Entry<R>) -> Result<FileTime> {
    if let Some(extensions) = entry.pax_extensions().map_err(corrupt)? {
        for extension in extensions {
            let extension = extension.map_err(corrupt)?;
            if extension.key().ok() == Some("mtime") {
                if let Some(mtime) = extension.value().ok().and_then(parse_pax_mtime) {
                    return Ok(mtime);
                }
            }
        }
    }
    let secs = entry.header().mtime().map_err(corrupt)?;
    Ok(FileTime::from_unix_time(secs as i64, 0))
}

/// Parse a PAX `mtime` value: decimal seconds with an optional fraction.
fn parse_pax_mtime(value: &str) -> Option<FileTime> {
    let (secs, frac) = match value.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (value, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(9).collect();
        let parsed: u32 = digits.parse().ok()?;
        parsed * 10u32.pow(9 - digits.len() as u32)
    };
    Some(FileTime::from_unix_time(secs, nanos))
}

/// Gzip an existing file into memory (no TAR wrapper). Used for the
/// manifest database, where rewriting mod times would be unsafe.
pub fn gzip_file(src: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(src)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    io::copy(&mut file, &mut encoder)?;
    Ok(encoder.finish()?)
}

/// Decompress plain-gzip bytes into a file at `dest`.
pub fn gunzip_to_file(data: &[u8], dest: &Path) -> Result<()> {
    let mut decoder = GzDecoder::new(data);
    let mut out = File::create(dest)?;
    match io::copy(&mut decoder, &mut out) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput || e.kind() == io::ErrorKind::InvalidData => {
            Err(corrupt(e))
        }
        Err(e) => Err(e.into()),
    }
}

fn corrupt(e: io::Error) -> DbackupError {
    DbackupError::CorruptArchive(e.to_string())
}

fn set_mode(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
}
