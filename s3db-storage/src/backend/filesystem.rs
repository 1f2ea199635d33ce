//! Filesystem storage backend with the enhanced-filesystem contract from
//! `spec.md` §4.1: optional compression, TTL expiry, per-key locking,
//! pre-overwrite backups, a write journal, and call counters.
//!
//! Layout: each key maps to a file under `root` (its `/`-separated
//! segments become path components) plus a sidecar `<file>.meta.json`
//! carrying user metadata, the etag, and optional expiry/compression
//! flags. This mirrors the teacher's one-blob-plus-metadata storage
//! shape while trading the S3 bucket/version-id keying for a flat tree.

use crate::error::{StorageError, StorageResult, check_metadata_budget};
use crate::list::{ListOptions, ListResult};
use crate::client::{GetResult, HeadResult, StorageClient, WriteResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

/// `compression.{enabled,threshold,level}`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CompressionOptions {
    #[builder(default = false)]
    pub enabled: bool,
    #[builder(default = 8192)]
    pub threshold: usize,
    #[builder(default = 6)]
    pub level: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `ttl.{enabled,defaultTTL,cleanupInterval}`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TtlOptions {
    #[builder(default = false)]
    pub enabled: bool,
    #[builder(default = Duration::from_secs(86_400))]
    pub default_ttl: Duration,
    #[builder(default = Duration::from_secs(300))]
    pub cleanup_interval: Duration,
}

impl Default for TtlOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `locking.{enabled,timeout}`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LockingOptions {
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default = Duration::from_secs(5))]
    pub timeout: Duration,
}

impl Default for LockingOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `backup.{enabled,suffix}`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BackupOptions {
    #[builder(default = false)]
    pub enabled: bool,
    #[builder(default = ".bak".to_string())]
    pub suffix: String,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `journal.{enabled,file}`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct JournalOptions {
    #[builder(default = false)]
    pub enabled: bool,
    #[builder(default = PathBuf::from("journal.log"))]
    pub file: PathBuf,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// `stats.{enabled}`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StatsOptions {
    #[builder(default = false)]
    pub enabled: bool,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The full enhanced-filesystem contract.
#[derive(Debug, Clone, TypedBuilder)]
pub struct FilesystemOptions {
    pub root: PathBuf,
    #[builder(default)]
    pub compression: CompressionOptions,
    #[builder(default)]
    pub ttl: TtlOptions,
    #[builder(default)]
    pub locking: LockingOptions,
    #[builder(default)]
    pub backup: BackupOptions,
    #[builder(default)]
    pub journal: JournalOptions,
    #[builder(default)]
    pub stats: StatsOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMeta {
    metadata: HashMap<String, String>,
    etag: String,
    content_length: u64,
    compressed: bool,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// Point-in-time snapshot of a [`FilesystemBackend`]'s call counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemStats {
    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    pub expired_evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    expired_evictions: AtomicU64,
}

/// A filesystem-backed [`StorageClient`] implementing the enhanced contract.
pub struct FilesystemBackend {
    options: FilesystemOptions,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    counters: Counters,
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend").field("root", &self.options.root).finish_non_exhaustive()
    }
}

impl FilesystemBackend {
    /// Create a backend rooted at `options.root`. Does not create the
    /// directory; callers should ensure it exists before use.
    #[must_use]
    pub fn new(options: FilesystemOptions) -> Self {
        Self { options, locks: DashMap::new(), counters: Counters::default() }
    }

    /// Snapshot the call counters (`stats.enabled` gates whether they're
    /// tracked; always readable, they simply stay zero when disabled).
    #[must_use]
    pub fn stats(&self) -> FilesystemStats {
        FilesystemStats {
            puts: self.counters.puts.load(Ordering::Relaxed),
            gets: self.counters.gets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            expired_evictions: self.counters.expired_evictions.load(Ordering::Relaxed),
        }
    }

    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.options.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == ".." || segment == "." {
                return Err(StorageError::InvalidRange { key: key.to_string(), reason: "invalid path segment".into() });
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn meta_path(data_path: &Path) -> PathBuf {
        let mut os = data_path.as_os_str().to_owned();
        os.push(".meta.json");
        PathBuf::from(os)
    }

    async fn lock_for(&self, key: &str) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        if !self.options.locking.enabled {
            return None;
        }
        let mutex = self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone();
        match tokio::time::timeout(self.options.locking.timeout, mutex.lock_owned()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(key, "lock acquisition timed out, proceeding unlocked");
                None
            }
        }
    }

    fn journal(&self, op: &str, key: &str) {
        if !self.options.journal.enabled {
            return;
        }
        let line = format!("{} {} {}\n", Utc::now().to_rfc3339(), op, key);
        let path = self.options.root.join(&self.options.journal.file);
        if let Err(e) = std::fs::OpenOptions::new().create(true).append(true).open(&path).and_then(|mut f| {
            use std::io::Write;
            f.write_all(line.as_bytes())
        }) {
            warn!(error = %e, "failed to append journal entry");
        }
    }

    fn compute_etag(body: &[u8]) -> String {
        use md5::Digest;
        hex::encode(md5::Md5::digest(body))
    }

    fn maybe_compress(&self, body: &[u8]) -> (Vec<u8>, bool) {
        if self.options.compression.enabled && body.len() >= self.options.compression.threshold {
            use flate2::Compression;
            use flate2::write::GzEncoder;
            use std::io::Write;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.options.compression.level));
            if encoder.write_all(body).is_ok() {
                if let Ok(compressed) = encoder.finish() {
                    return (compressed, true);
                }
            }
        }
        (body.to_vec(), false)
    }

    fn maybe_decompress(compressed: bool, body: Vec<u8>) -> StorageResult<Bytes> {
        if !compressed {
            return Ok(Bytes::from(body));
        }
        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut decoder = GzDecoder::new(body.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Bytes::from(out))
    }

    async fn read_meta(meta_path: &Path) -> StorageResult<SidecarMeta> {
        let bytes = tokio::fs::read(meta_path).await.map_err(|e| anyhow::anyhow!(e))?;
        serde_json::from_slice(&bytes).map_err(|e| anyhow::anyhow!(e).into())
    }

    async fn evict_if_expired(&self, key: &str, data_path: &Path, meta: &SidecarMeta) -> StorageResult<bool> {
        let Some(expires_at) = meta.expires_at else { return Ok(false) };
        if expires_at > Utc::now() {
            return Ok(false);
        }
        let meta_path = Self::meta_path(data_path);
        let _ = tokio::fs::remove_file(data_path).await;
        let _ = tokio::fs::remove_file(&meta_path).await;
        self.counters.expired_evictions.fetch_add(1, Ordering::Relaxed);
        debug!(key, "evicted expired object");
        Ok(true)
    }
}

#[async_trait]
impl StorageClient for FilesystemBackend {
    async fn put(&self, key: &str, body: Bytes, metadata: HashMap<String, String>) -> StorageResult<WriteResult> {
        check_metadata_budget(&metadata)?;
        let data_path = self.key_to_path(key)?;
        let meta_path = Self::meta_path(&data_path);
        let _guard = self.lock_for(key).await;

        if self.options.backup.enabled && tokio::fs::try_exists(&data_path).await.unwrap_or(false) {
            let backup_path = {
                let mut os = data_path.as_os_str().to_owned();
                os.push(&self.options.backup.suffix);
                PathBuf::from(os)
            };
            if let Err(e) = tokio::fs::copy(&data_path, &backup_path).await {
                warn!(key, error = %e, "failed to write backup copy");
            }
        }

        if let Some(parent) = data_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| anyhow::anyhow!(e))?;
        }

        let etag = Self::compute_etag(&body);
        let content_length = body.len() as u64;
        let (on_disk, compressed) = self.maybe_compress(&body);
        let expires_at = self.options.ttl.enabled.then(|| Utc::now() + self.options.ttl.default_ttl);

        tokio::fs::write(&data_path, &on_disk).await.map_err(|e| anyhow::anyhow!(e))?;
        let sidecar = SidecarMeta { metadata, etag: etag.clone(), content_length, compressed, created_at: Utc::now(), expires_at };
        let sidecar_json = serde_json::to_vec(&sidecar).map_err(|e| anyhow::anyhow!(e))?;
        tokio::fs::write(&meta_path, sidecar_json).await.map_err(|e| anyhow::anyhow!(e))?;

        if self.options.stats.enabled {
            self.counters.puts.fetch_add(1, Ordering::Relaxed);
        }
        self.journal("PUT", key);
        Ok(WriteResult { etag, size: content_length })
    }

    async fn get(&self, key: &str) -> StorageResult<GetResult> {
        let data_path = self.key_to_path(key)?;
        let meta_path = Self::meta_path(&data_path);
        let meta = Self::read_meta(&meta_path).await.map_err(|_| StorageError::NoSuchKey { key: key.to_string() })?;

        if self.evict_if_expired(key, &data_path, &meta).await? {
            return Err(StorageError::NoSuchKey { key: key.to_string() });
        }

        let raw = tokio::fs::read(&data_path).await.map_err(|_| StorageError::NoSuchKey { key: key.to_string() })?;
        let body = Self::maybe_decompress(meta.compressed, raw)?;

        if self.options.stats.enabled {
            self.counters.gets.fetch_add(1, Ordering::Relaxed);
        }
        Ok(GetResult { content_length: body.len() as u64, body, metadata: meta.metadata, etag: meta.etag })
    }

    async fn head(&self, key: &str) -> StorageResult<HeadResult> {
        let data_path = self.key_to_path(key)?;
        let meta_path = Self::meta_path(&data_path);
        let meta = Self::read_meta(&meta_path).await.map_err(|_| StorageError::NoSuchKey { key: key.to_string() })?;

        if self.evict_if_expired(key, &data_path, &meta).await? {
            return Err(StorageError::NoSuchKey { key: key.to_string() });
        }

        Ok(HeadResult { metadata: meta.metadata, content_length: meta.content_length, etag: meta.etag })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let data_path = self.key_to_path(key)?;
        let meta_path = Self::meta_path(&data_path);
        let _guard = self.lock_for(key).await;
        let _ = tokio::fs::remove_file(&data_path).await;
        let _ = tokio::fs::remove_file(&meta_path).await;
        if self.options.stats.enabled {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        self.journal("DELETE", key);
        Ok(())
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult> {
        let start_after = match &options.continuation {
            Some(token) => Some(crate::list::decode_continuation(token)?),
            None => None,
        };

        let root = self.options.root.clone();
        let prefix_owned = prefix.to_string();
        let mut keys = tokio::task::spawn_blocking(move || collect_keys(&root, &prefix_owned))
            .await
            .map_err(|e| anyhow::anyhow!(e))??;
        keys.sort();
        if let Some(after) = &start_after {
            keys.retain(|k| k.as_str() > after.as_str());
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(ListResult { keys: Vec::new(), continuation: options.continuation });
        }

        let truncated = keys.len() > limit;
        keys.truncate(limit);
        let continuation = if truncated { keys.last().map(|k| crate::list::encode_continuation(k)) } else { None };
        Ok(ListResult { keys, continuation })
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<WriteResult> {
        let result = self.get(src).await?;
        self.put(dst, result.body, result.metadata).await
    }
}

fn collect_keys(root: &Path, prefix: &str) -> StorageResult<Vec<String>> {
    let mut keys = Vec::new();
    walk(root, root, prefix, &mut keys)?;
    Ok(keys)
}

fn walk(root: &Path, dir: &Path, prefix: &str, out: &mut Vec<String>) -> StorageResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(anyhow::anyhow!(e).into()),
    };
    for entry in entries {
        let entry = entry.map_err(|e| anyhow::anyhow!(e))?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, prefix, out)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if name.ends_with(".meta.json") || name.ends_with(".bak") {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else { continue };
        let key = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
        if key.starts_with(prefix) {
            out.push(key);
        }
    }
    Ok(())
}
