//! The [`StorageClient`] trait every backend implements.

use crate::error::StorageResult;
use crate::list::{ListOptions, ListResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use tokio::io::AsyncRead;

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Opaque version token, used for optimistic-concurrency compare-and-swap.
    pub etag: String,
    /// Size of the body written, in bytes.
    pub size: u64,
}

/// Result of a `get`.
#[derive(Debug, Clone)]
pub struct GetResult {
    /// Object body.
    pub body: Bytes,
    /// User metadata.
    pub metadata: HashMap<String, String>,
    /// Body length in bytes.
    pub content_length: u64,
    /// Current etag.
    pub etag: String,
}

/// Result of a `head` (metadata only, no body transfer).
#[derive(Debug, Clone)]
pub struct HeadResult {
    /// User metadata.
    pub metadata: HashMap<String, String>,
    /// Body length in bytes.
    pub content_length: u64,
    /// Current etag.
    pub etag: String,
}

/// Uniform key/value + metadata interface over heterogeneous object
/// stores (`spec.md` §4.1).
#[async_trait]
pub trait StorageClient: Send + Sync + fmt::Debug {
    /// Write `body` with `metadata` at `key`. Rejects metadata exceeding
    /// the 2 KiB budget with [`crate::error::StorageError::MetadataTooLarge`].
    async fn put(&self, key: &str, body: Bytes, metadata: HashMap<String, String>) -> StorageResult<WriteResult>;

    /// Fetch an object's body and metadata. Fails with `NoSuchKey` when absent.
    async fn get(&self, key: &str) -> StorageResult<GetResult>;

    /// Fetch an object's metadata only, never transferring the body.
    async fn head(&self, key: &str) -> StorageResult<HeadResult>;

    /// Delete an object. Idempotent: deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys under `prefix`, honoring continuation tokens and limits.
    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult>;

    /// Copy an object to a new key, preserving metadata.
    async fn copy(&self, src: &str, dst: &str) -> StorageResult<WriteResult>;

    /// Move (copy then delete) an object to a new key.
    async fn rename(&self, src: &str, dst: &str) -> StorageResult<WriteResult> {
        let result = self.copy(src, dst).await?;
        self.delete(src).await?;
        Ok(result)
    }

    /// `true` if `key` exists.
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(crate::error::StorageError::NoSuchKey { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Write a streamed body above the streaming threshold (`spec.md` §4.1
    /// default 5 MiB). The default implementation buffers the reader fully
    /// and delegates to [`StorageClient::put`]; backends that can stream
    /// natively should override this.
    async fn put_stream(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        metadata: HashMap<String, String>,
    ) -> StorageResult<WriteResult> {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.map_err(|e| anyhow::anyhow!(e))?;
        self.put(key, Bytes::from(buf), metadata).await
    }

    /// Read an object's body as a stream. The default implementation
    /// fetches the whole body and wraps it in a cursor; backends that can
    /// stream natively should override this.
    async fn get_stream(&self, key: &str) -> StorageResult<Box<dyn AsyncRead + Send + Unpin>> {
        let result = self.get(key).await?;
        let cursor: Box<dyn AsyncRead + Send + Unpin> = Box::new(std::io::Cursor::new(result.body));
        Ok(cursor)
    }
}
