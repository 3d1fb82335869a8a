use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbackupError>;

#[derive(Debug, Error)]
pub enum DbackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote storage error: {0}")]
    Remote(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] rusqlite::Error),

    #[error("manifest invariant violation: {0}")]
    ManifestInvariantViolation(String),

    #[error("files have changed in storage since the last backup ({} differences)", .0.len())]
    RemoteDriftDetected(Vec<String>),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid stored mod time: {0}")]
    TimeFormat(#[from] chrono::format::ParseError),
}
