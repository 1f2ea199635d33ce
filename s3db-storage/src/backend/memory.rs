//! In-memory storage backend.
//!
//! Generalizes `ruststack-s3-core::storage::InMemoryStorage`: bodies below
//! `max_memory_size` live in a [`DashMap`] as [`Bytes`]; larger bodies spill
//! to a [`tempfile`], cleaned up via a `Drop` impl. The bucket/multipart
//! concepts the teacher needed for S3 semantics are dropped since this
//! engine only needs flat key/value storage.

use crate::client::{GetResult, HeadResult, StorageClient, WriteResult};
use crate::error::{StorageError, StorageResult, check_metadata_budget};
use crate::list::{ListOptions, ListResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{trace, warn};

/// Default maximum object size kept in memory before spilling to disk (512 KiB).
pub const DEFAULT_MAX_MEMORY_SIZE: usize = 524_288;

enum StoredBody {
    InMemory { data: Bytes },
    OnDisk { path: PathBuf, size: u64 },
}

impl std::fmt::Debug for StoredBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory { data } => f.debug_struct("InMemory").field("size", &data.len()).finish(),
            Self::OnDisk { path, size } => f.debug_struct("OnDisk").field("path", path).field("size", size).finish(),
        }
    }
}

impl Drop for StoredBody {
    fn drop(&mut self) {
        if let Self::OnDisk { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path.as_path()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove spilled object file");
                }
            } else {
                trace!(path = %path.display(), "removed spilled object file");
            }
        }
    }
}

impl StoredBody {
    async fn read_all(&self) -> StorageResult<Bytes> {
        match self {
            Self::InMemory { data } => Ok(data.clone()),
            Self::OnDisk { path, size } => {
                let mut file = tokio::fs::File::open(path).await.map_err(|e| anyhow::anyhow!(e))?;
                let capacity = usize::try_from(*size).unwrap_or(usize::MAX);
                let mut buf = BytesMut::with_capacity(capacity);
                file.read_buf(&mut buf).await.map_err(|e| anyhow::anyhow!(e))?;
                Ok(buf.freeze())
            }
        }
    }

    fn len(&self) -> u64 {
        match self {
            Self::InMemory { data } => data.len() as u64,
            Self::OnDisk { size, .. } => *size,
        }
    }
}

#[derive(Debug)]
struct StoredObject {
    body: StoredBody,
    metadata: HashMap<String, String>,
    etag: String,
}

/// In-memory [`StorageClient`], suitable for tests and the `memory://`
/// connection scheme.
pub struct MemoryBackend {
    objects: DashMap<String, StoredObject>,
    max_memory_size: usize,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("objects", &self.objects.len()).finish_non_exhaustive()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_SIZE)
    }
}

impl MemoryBackend {
    /// Create a backend spilling bodies above `max_memory_size` bytes to
    /// temporary files.
    #[must_use]
    pub fn new(max_memory_size: usize) -> Self {
        Self { objects: DashMap::new(), max_memory_size }
    }

    async fn store_body(&self, body: Bytes) -> StorageResult<StoredBody> {
        if body.len() <= self.max_memory_size {
            return Ok(StoredBody::InMemory { data: body });
        }
        let tmp = tempfile::NamedTempFile::new().map_err(|e| anyhow::anyhow!(e))?;
        let (file, path) = tmp.keep().map_err(|e| anyhow::anyhow!(e.error))?;
        let mut file = tokio::fs::File::from_std(file);
        use tokio::io::AsyncWriteExt;
        file.write_all(&body).await.map_err(|e| anyhow::anyhow!(e))?;
        file.flush().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(StoredBody::OnDisk { path, size: body.len() as u64 })
    }

    fn compute_etag(body: &[u8]) -> String {
        use md5::Digest;
        let digest = md5::Md5::digest(body);
        hex::encode(digest)
    }
}

#[async_trait]
impl StorageClient for MemoryBackend {
    async fn put(&self, key: &str, body: Bytes, metadata: HashMap<String, String>) -> StorageResult<WriteResult> {
        check_metadata_budget(&metadata)?;
        let etag = Self::compute_etag(&body);
        let size = body.len() as u64;
        let stored = self.store_body(body).await?;
        self.objects.insert(key.to_string(), StoredObject { body: stored, metadata, etag: etag.clone() });
        Ok(WriteResult { etag, size })
    }

    async fn get(&self, key: &str) -> StorageResult<GetResult> {
        let entry = self.objects.get(key).ok_or_else(|| StorageError::NoSuchKey { key: key.to_string() })?;
        let body = entry.body.read_all().await?;
        Ok(GetResult {
            content_length: body.len() as u64,
            body,
            metadata: entry.metadata.clone(),
            etag: entry.etag.clone(),
        })
    }

    async fn head(&self, key: &str) -> StorageResult<HeadResult> {
        let entry = self.objects.get(key).ok_or_else(|| StorageError::NoSuchKey { key: key.to_string() })?;
        Ok(HeadResult {
            metadata: entry.metadata.clone(),
            content_length: entry.body.len(),
            etag: entry.etag.clone(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult> {
        let start_after = match &options.continuation {
            Some(token) => Some(crate::list::decode_continuation(token)?),
            None => None,
        };

        let mut keys: Vec<String> =
            self.objects.iter().map(|entry| entry.key().clone()).filter(|k| k.starts_with(prefix)).collect();
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
        let entry = self.objects.get(src).ok_or_else(|| StorageError::NoSuchKey { key: src.to_string() })?;
        let body = entry.body.read_all().await?;
        let metadata = entry.metadata.clone();
        drop(entry);
        self.put(dst, body, metadata).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_put_and_get_object() {
        let backend = MemoryBackend::default();
        backend.put("k1", Bytes::from_static(b"hello"), HashMap::new()).await.expect("put");
        let result = backend.get("k1").await.expect("get");
        assert_eq!(result.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_should_fail_get_on_missing_key() {
        let backend = MemoryBackend::default();
        let err = backend.get("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NoSuchKey { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = MemoryBackend::default();
        backend.delete("never-existed").await.expect("idempotent delete");
        backend.put("k1", Bytes::from_static(b"x"), HashMap::new()).await.expect("put");
        backend.delete("k1").await.expect("delete");
        backend.delete("k1").await.expect("delete again");
        assert!(!backend.exists("k1").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_should_reject_oversized_metadata() {
        let backend = MemoryBackend::default();
        let metadata = HashMap::from([("k".to_string(), "x".repeat(3000))]);
        let err = backend.put("k1", Bytes::from_static(b"x"), metadata).await.unwrap_err();
        assert!(matches!(err, StorageError::MetadataTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_should_list_with_prefix_and_pagination() {
        let backend = MemoryBackend::default();
        for i in 0..5 {
            backend.put(&format!("resource=orders/data/id={i}"), Bytes::new(), HashMap::new()).await.expect("put");
        }
        backend.put("resource=users/data/id=0", Bytes::new(), HashMap::new()).await.expect("put");

        let page1 = backend.list("resource=orders/", ListOptions { continuation: None, limit: Some(2) }).await.expect("list");
        assert_eq!(page1.keys.len(), 2);
        assert!(page1.continuation.is_some());

        let page2 = backend
            .list("resource=orders/", ListOptions { continuation: page1.continuation, limit: Some(10) })
            .await
            .expect("list");
        assert_eq!(page2.keys.len(), 3);
        assert!(page2.continuation.is_none());
    }

    #[tokio::test]
    async fn test_list_limit_zero_returns_empty_without_touching_storage() {
        let backend = MemoryBackend::default();
        backend.put("resource=orders/data/id=1", Bytes::new(), HashMap::new()).await.expect("put");
        let result = backend.list("resource=orders/", ListOptions { continuation: None, limit: Some(0) }).await.expect("list");
        assert!(result.keys.is_empty());
    }

    #[tokio::test]
    async fn test_should_spill_large_objects_to_disk_and_read_back() {
        let backend = MemoryBackend::new(16);
        let body = Bytes::from(vec![7u8; 1024]);
        backend.put("big", body.clone(), HashMap::new()).await.expect("put");
        let result = backend.get("big").await.expect("get");
        assert_eq!(result.body, body);
    }

    #[tokio::test]
    async fn test_should_copy_object_with_metadata() {
        let backend = MemoryBackend::default();
        let metadata = HashMap::from([("_v".to_string(), "h1".to_string())]);
        backend.put("src", Bytes::from_static(b"data"), metadata).await.expect("put");
        backend.copy("src", "dst").await.expect("copy");
        let result = backend.get("dst").await.expect("get");
        assert_eq!(result.body, Bytes::from_static(b"data"));
        assert_eq!(result.metadata.get("_v"), Some(&"h1".to_string()));
    }
}
