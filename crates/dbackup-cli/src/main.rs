use std::path::{Component, Path, PathBuf};

use clap::Parser;

use dbackup_core::commands::backup::{self, BackupOptions};
use dbackup_core::commands::recover::{self, RecoverOptions};
use dbackup_core::config::RemoteConfig;
use dbackup_core::error::DbackupError;
use dbackup_core::hash;
use dbackup_core::storage;

#[derive(Parser)]
#[command(
    name = "dbackup",
    version,
    about = "Incremental directory backup to S3-compatible storage",
    after_help = "\
By default this runs in dry-run mode against a local MinIO endpoint, so a
stray invocation can't touch a real backup. Pass --dry-run=false to write.

Environment variables:
  DBACKUP_ACCESS_KEY_ID / DBACKUP_SECRET_ACCESS_KEY   Remote credentials
  AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY           Fallback credentials"
)]
struct Cli {
    /// Root directory for the backup operation
    #[arg(long, default_value = ".")]
    dir: String,

    /// Name of the backup (default: derived from the root directory)
    #[arg(long)]
    name: Option<String>,

    /// Directory holding the local manifest database (default: ~/.dbackup/)
    #[arg(long)]
    db: Option<String>,

    /// Remote bucket
    #[arg(long, default_value = "my-bucket")]
    bucket: String,

    /// Key prefix base for objects in the bucket; the effective prefix is
    /// <prefix>/<name>
    #[arg(long, default_value = "backups")]
    prefix: String,

    /// Threshold in bytes above which a file is backed up by itself, and
    /// the maximum size of a directory rolled up into one archive
    #[arg(long, default_value_t = 1024 * 1024)]
    size_threshold: u64,

    /// Recover FROM the remote location TO the local directory
    #[arg(long)]
    recover: bool,

    /// Print a plan without sending anything to the backup destination
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    dry_run: bool,

    /// Proceed even if the remote manifest has drifted from the local one
    #[arg(long)]
    force: bool,

    /// Logging verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Object-store endpoint URL (for S3-compatible services)
    #[arg(long, default_value = "http://localhost:9000")]
    s3_url: String,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    fn filter(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Verbose => "debug",
            LogLevel::Debug => "trace",
        }
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.filter())
        .with_target(false)
        .init();

    if let Err(e) = run(&cli) {
        if let DbackupError::RemoteDriftDetected(ref changes) = e {
            eprintln!("Files have changed in storage since the last backup or recovery:");
            for change in changes {
                eprintln!("  {change}");
            }
        }
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), DbackupError> {
    let name = match &cli.name {
        Some(name) => name.clone(),
        None => {
            // Digest of the normalized absolute root, so each directory
            // gets a stable name without the user picking one.
            let abs = clean_absolute(Path::new(&cli.dir))?;
            hash::name_digest(&abs.to_string_lossy())
        }
    };

    let db_dir = match &cli.db {
        Some(db) => PathBuf::from(db),
        None => home_dir()
            .ok_or_else(|| DbackupError::Config("cannot determine home directory".into()))?
            .join(".dbackup"),
    };
    let manifest_path = db_dir.join(format!("{name}.db"));
    tracing::info!("using manifest file: {}", manifest_path.display());
    tracing::info!("using remote: {}/{} prefix {}", cli.s3_url, cli.bucket, cli.prefix);

    let config = RemoteConfig::from_env(&cli.bucket, &cli.s3_url);
    let store = storage::store_from_config(&config)?;

    if cli.recover {
        recover::run(
            store.as_ref(),
            &manifest_path,
            &cli.prefix,
            &name,
            Path::new(&cli.dir),
            &RecoverOptions { force: cli.force },
        )
    } else {
        backup::run(
            store.as_ref(),
            &manifest_path,
            Path::new(&cli.dir),
            &cli.prefix,
            &name,
            cli.size_threshold,
            &BackupOptions {
                force: cli.force,
                dry_run: cli.dry_run,
            },
        )
        .map(|_| ())
    }
}

/// Absolute path with `.` and `..` resolved lexically; the target does
/// not need to exist (recovery may create it).
fn clean_absolute(path: &Path) -> Result<PathBuf, DbackupError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    Ok(cleaned)
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_absolute_resolves_dot_components() {
        let cleaned = clean_absolute(Path::new("/a/b/../c/./d")).unwrap();
        assert_eq!(cleaned, PathBuf::from("/a/c/d"));
    }

    #[test]
    fn clean_absolute_anchors_relative_paths() {
        let cleaned = clean_absolute(Path::new("x/y")).unwrap();
        assert!(cleaned.is_absolute());
        assert!(cleaned.ends_with("x/y"));
    }

    #[test]
    fn default_name_is_stable_for_a_path() {
        let a = hash::name_digest("/some/backup/root");
        let b = hash::name_digest("/some/backup/root");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
