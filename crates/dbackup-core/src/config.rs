use serde::{Deserialize, Serialize};

/// Connection settings for the remote object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bucket holding the backup objects.
    pub bucket: String,
    /// Endpoint URL for S3-compatible services (`http(s)://host[:port]`),
    /// or a local directory path for a filesystem-backed store.
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl RemoteConfig {
    /// Build a config for `bucket` at `endpoint`, reading credentials from
    /// the environment. Falls back to the MinIO test defaults so stray runs
    /// hit a local service instead of a real account.
    pub fn from_env(bucket: &str, endpoint: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            endpoint: endpoint.to_string(),
            region: env_or("DBACKUP_REGION", "us-east-1"),
            access_key_id: std::env::var("DBACKUP_ACCESS_KEY_ID")
                .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minio".to_string()),
            secret_access_key: std::env::var("DBACKUP_SECRET_ACCESS_KEY")
                .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minio123".to_string()),
            retry: RetryConfig::default(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Retry configuration for remote storage requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}
