pub mod local_backend;
pub mod s3_backend;

use crate::config::RemoteConfig;
use crate::error::Result;

/// Abstract key-value storage for backup objects.
/// Keys are `/`-separated string paths (e.g. "backups/abc123/a.txt.tar.gz").
pub trait ObjectStore: Send + Sync {
    /// Read an object by key. Returns `None` if not found.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object. Overwrites if it already exists.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Delete the given objects. Missing keys are not an error.
    fn delete(&self, keys: &[String]) -> Result<()>;

    /// Probe the configured bucket, failing fast on a misconfigured remote.
    fn head_bucket(&self) -> Result<()>;

    /// List all keys under a prefix. Returns full key paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Build an object store from the remote configuration.
///
/// An `http(s)://` endpoint selects the S3 backend; anything else is
/// treated as a local directory holding the bucket as a subdirectory.
pub fn store_from_config(cfg: &RemoteConfig) -> Result<Box<dyn ObjectStore>> {
    if cfg.endpoint.starts_with("http://") || cfg.endpoint.starts_with("https://") {
        Ok(Box::new(s3_backend::S3Backend::new(
            &cfg.bucket,
            &cfg.region,
            &cfg.endpoint,
            &cfg.access_key_id,
            &cfg.secret_access_key,
            cfg.retry.clone(),
        )?))
    } else {
        let root = std::path::Path::new(&cfg.endpoint).join(&cfg.bucket);
        Ok(Box::new(local_backend::LocalBackend::new(&root)))
    }
}
