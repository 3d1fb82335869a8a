use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{DbackupError, Result};

/// Stored timestamp format: millisecond precision, UTC. Kept as a fixed
/// string so two manifests agree byte-for-byte on equal times.
const MOD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Basename that is never backed up. This is a pattern match, so a user
/// file with this exact name is silently skipped too.
pub const MANIFEST_BASENAME: &str = "backup.db";

/// One tracked file: the state it had as of its last successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub mod_time: DateTime<Utc>,
    pub hash: String,
    /// Batch identifier; equals `path` when the file was uploaded alone.
    pub batch: String,
}

/// Summary of one persisted batch, derived from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMeta {
    pub path: String,
    pub is_single_file: bool,
    pub filenames: Option<Vec<String>>,
}

/// Durable index of backed-up files, keyed by relative path.
///
/// The handle owns the connection for the duration of an operation;
/// two concurrent operations against the same file are unsupported.
pub struct Manifest {
    conn: Connection,
}

impl Manifest {
    /// Open (creating if needed) the manifest at `path`. Parent
    /// directories are created as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT,
                mod_time TEXT,
                hash TEXT,
                -- The batch that this file belongs to
                batch TEXT,
                PRIMARY KEY (path)
            )",
        )?;
        Ok(Self { conn })
    }

    /// Release the session, leaving a complete on-disk copy.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| DbackupError::Manifest(e))
    }

    pub fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT mod_time, hash, batch FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mod_time, hash, batch)) => Ok(Some(FileRecord {
                path: path.to_string(),
                mod_time: parse_mod_time(&mod_time)?,
                hash,
                batch,
            })),
            None => Ok(None),
        }
    }

    /// Write or replace the record for `path` atomically.
    pub fn upsert(
        &self,
        path: &str,
        mod_time: DateTime<Utc>,
        hash: &str,
        batch: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files (path, mod_time, hash, batch)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (path)
             DO UPDATE SET
                 mod_time = excluded.mod_time,
                 hash = excluded.hash,
                 batch = excluded.batch",
            params![path, format_mod_time(&mod_time), hash, batch],
        )?;
        Ok(())
    }

    pub fn delete_by_path(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Remove every record belonging to `batch`.
    pub fn delete_by_batch(&self, batch: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM files WHERE batch = ?1", params![batch])?;
        Ok(())
    }

    pub fn files_in_batch(&self, batch: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM files WHERE batch = ?1")?;
        let rows = stmt.query_map(params![batch], |row| row.get::<_, String>(0))?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// All records, in unspecified order.
    pub fn all_records(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, mod_time, hash, batch FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (path, mod_time, hash, batch) = row?;
            records.push(FileRecord {
                path,
                mod_time: parse_mod_time(&mod_time)?,
                hash,
                batch,
            });
        }
        Ok(records)
    }

    /// Group records by batch. A batch is single-file when every member
    /// path equals the batch path; a group mixing both shapes is a hard
    /// error.
    pub fn batches(&self, include_filenames: bool) -> Result<Vec<BatchMeta>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                batch,
                count(*) AS num_files,
                sum(grouped) AS num_grouped,
                group_concat(path) AS filenames
            FROM (
                SELECT
                    batch,
                    path,
                    CASE
                        WHEN batch != path THEN 1
                        ELSE 0
                    END AS grouped
                FROM files
            )
            GROUP BY batch",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut batches = Vec::new();
        for row in rows {
            let (batch, num_files, num_grouped, filenames) = row?;
            if num_grouped > 0 && num_grouped != num_files {
                return Err(DbackupError::ManifestInvariantViolation(format!(
                    "batch {batch:?} has multiple files where one filename matches the batch name"
                )));
            }
            batches.push(BatchMeta {
                path: batch,
                is_single_file: num_grouped == 0,
                filenames: include_filenames
                    .then(|| filenames.split(',').map(str::to_string).collect()),
            });
        }
        Ok(batches)
    }
}

fn format_mod_time(t: &DateTime<Utc>) -> String {
    t.format(MOD_TIME_FORMAT).to_string()
}

fn parse_mod_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(s, MOD_TIME_FORMAT)?.and_utc())
}
