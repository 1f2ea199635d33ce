//! Engine-wide configuration.
//!
//! Mirrors the teacher's per-service `*Config` structs: a `typed_builder`
//! type with sane defaults, camelCase JSON serialization, and an
//! `from_env()` constructor for ambient process configuration. The core
//! itself never reads the environment on its own initiative; `from_env`
//! exists for host applications that want it.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Engine-wide tunables: retry/backoff shape, lock timing, worker pool
/// sizing, and logging. See `spec.md` §5 for the defaults this mirrors.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum attempts for storage-level transient-failure retries.
    #[builder(default = 5)]
    pub storage_retry_attempts: u32,

    /// Base backoff in milliseconds for storage retries.
    #[builder(default = 100)]
    pub storage_retry_base_ms: u64,

    /// Backoff cap in milliseconds for storage retries.
    #[builder(default = 5_000)]
    pub storage_retry_cap_ms: u64,

    /// Attempts for per-key lock acquisition under contention.
    #[builder(default = 10)]
    pub lock_retry_attempts: u32,

    /// Base backoff in milliseconds for lock acquisition retries.
    #[builder(default = 50)]
    pub lock_retry_base_ms: u64,

    /// Default lock lease timeout in milliseconds.
    #[builder(default = 5_000)]
    pub lock_timeout_ms: u64,

    /// Default per-I/O timeout in milliseconds.
    #[builder(default = 60_000)]
    pub io_timeout_ms: u64,

    /// Concurrency of the async partition worker pool.
    #[builder(default = 16)]
    pub partition_worker_concurrency: usize,

    /// Bound on the async partition worker queue.
    #[builder(default = 1024)]
    pub partition_worker_queue: usize,

    /// Threshold in bytes above which storage bodies are streamed.
    #[builder(default = 5 * 1024 * 1024)]
    pub streaming_threshold_bytes: usize,

    /// Default page size for list/query operations.
    #[builder(default = 100)]
    pub default_page_size: usize,

    /// Maximum page size accepted for list/query operations.
    #[builder(default = 1_000)]
    pub max_page_size: usize,

    /// Log level filter string, e.g. `"info"`, `"debug"`.
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_retry_attempts: 5,
            storage_retry_base_ms: 100,
            storage_retry_cap_ms: 5_000,
            lock_retry_attempts: 10,
            lock_retry_base_ms: 50,
            lock_timeout_ms: 5_000,
            io_timeout_ms: 60_000,
            partition_worker_concurrency: 16,
            partition_worker_queue: 1024,
            streaming_threshold_bytes: 5 * 1024 * 1024,
            default_page_size: 100,
            max_page_size: 1_000,
            log_level: String::from("info"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3DB_STORAGE_RETRY_ATTEMPTS` | `5` |
    /// | `S3DB_STORAGE_RETRY_BASE_MS` | `100` |
    /// | `S3DB_STORAGE_RETRY_CAP_MS` | `5000` |
    /// | `S3DB_LOCK_RETRY_ATTEMPTS` | `10` |
    /// | `S3DB_LOCK_RETRY_BASE_MS` | `50` |
    /// | `S3DB_LOCK_TIMEOUT_MS` | `5000` |
    /// | `S3DB_IO_TIMEOUT_MS` | `60000` |
    /// | `S3DB_PARTITION_WORKER_CONCURRENCY` | `16` |
    /// | `S3DB_PARTITION_WORKER_QUEUE` | `1024` |
    /// | `S3DB_STREAMING_THRESHOLD_BYTES` | `5242880` |
    /// | `S3DB_DEFAULT_PAGE_SIZE` | `100` |
    /// | `S3DB_MAX_PAGE_SIZE` | `1000` |
    /// | `S3DB_LOG_LEVEL` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        set_from_env("S3DB_STORAGE_RETRY_ATTEMPTS", &mut config.storage_retry_attempts);
        set_from_env("S3DB_STORAGE_RETRY_BASE_MS", &mut config.storage_retry_base_ms);
        set_from_env("S3DB_STORAGE_RETRY_CAP_MS", &mut config.storage_retry_cap_ms);
        set_from_env("S3DB_LOCK_RETRY_ATTEMPTS", &mut config.lock_retry_attempts);
        set_from_env("S3DB_LOCK_RETRY_BASE_MS", &mut config.lock_retry_base_ms);
        set_from_env("S3DB_LOCK_TIMEOUT_MS", &mut config.lock_timeout_ms);
        set_from_env("S3DB_IO_TIMEOUT_MS", &mut config.io_timeout_ms);
        set_from_env(
            "S3DB_PARTITION_WORKER_CONCURRENCY",
            &mut config.partition_worker_concurrency,
        );
        set_from_env("S3DB_PARTITION_WORKER_QUEUE", &mut config.partition_worker_queue);
        set_from_env(
            "S3DB_STREAMING_THRESHOLD_BYTES",
            &mut config.streaming_threshold_bytes,
        );
        set_from_env("S3DB_DEFAULT_PAGE_SIZE", &mut config.default_page_size);
        set_from_env("S3DB_MAX_PAGE_SIZE", &mut config.max_page_size);
        if let Ok(v) = std::env::var("S3DB_LOG_LEVEL") {
            config.log_level = v;
        }
        config
    }
}

fn set_from_env<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse::<T>() {
            *field = parsed;
        }
    }
}
