//! AWS S3 (and S3-compatible, e.g. MinIO) storage backend.
//!
//! Wraps `aws-sdk-s3`, the stack the teacher workspace already depends on
//! for its own S3 *emulation*; here it is used the other way around, as a
//! client against a real or compatible endpoint. Retries for transient
//! failures go through the shared [`crate::retry::RetryPolicy`], matching
//! the bounded-retry shape the teacher uses for lock acquisition.

use crate::client::{GetResult, HeadResult, StorageClient, WriteResult};
use crate::error::{StorageError, StorageResult, check_metadata_budget};
use crate::list::{ListOptions, ListResult};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::warn;

/// `httpClientOptions.{keepAlive,maxSockets,timeouts}` (`spec.md` §4.1).
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    /// Whether HTTP keep-alive is enabled.
    pub keep_alive: bool,
    /// Maximum concurrent sockets the connection pool may open.
    pub max_sockets: usize,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self { keep_alive: true, max_sockets: 50, timeout_ms: 60_000 }
    }
}

/// Configuration for [`S3Backend`].
#[derive(Debug, Clone)]
pub struct S3Options {
    /// Target bucket.
    pub bucket: String,
    /// AWS region, when not using a custom endpoint's default.
    pub region: Option<String>,
    /// Custom endpoint URL, for MinIO and similar S3-compatible stores.
    pub endpoint: Option<String>,
    /// Force path-style addressing (required by most non-AWS endpoints).
    pub force_path_style: bool,
    /// Static access/secret key pair, for connection strings that carry
    /// explicit credentials rather than relying on the ambient provider
    /// chain (environment, profile, IMDS).
    pub static_credentials: Option<(String, String)>,
    /// Connection pool / timeout tuning.
    pub http: HttpClientOptions,
    /// Retry shape for transient failures.
    pub retry: RetryPolicy,
}

impl S3Options {
    /// Start building options for `bucket`, with spec-default retry/http settings.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            force_path_style: false,
            static_credentials: None,
            http: HttpClientOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// An [`StorageClient`] backed by a real or S3-compatible object store.
pub struct S3Backend {
    client: Client,
    options: S3Options,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend").field("bucket", &self.options.bucket).finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a backend from an already-constructed `aws-sdk-s3` client.
    /// Host applications that need custom credentials providers build the
    /// client themselves and hand it in here; [`S3Backend::connect`] covers
    /// the common case of building one from [`S3Options`] alone.
    #[must_use]
    pub fn new(client: Client, options: S3Options) -> Self {
        Self { client, options }
    }

    /// Build an `aws-sdk-s3` client from `options` and connect.
    pub async fn connect(options: S3Options) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some((access_key, secret_key)) = &options.static_credentials {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "s3db-connection-string",
            ));
        }
        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        builder = builder.force_path_style(options.force_path_style);
        let client = Client::from_conf(builder.build());
        Ok(Self::new(client, options))
    }

    fn is_transient(err: &StorageError) -> bool {
        matches!(err, StorageError::Connection { .. } | StorageError::Internal(_))
    }

    async fn retrying<T, F, Fut>(&self, f: F) -> StorageResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StorageResult<T>>,
    {
        self.options.retry.run(Self::is_transient, f).await
    }
}

#[async_trait]
impl StorageClient for S3Backend {
    async fn put(&self, key: &str, body: Bytes, metadata: HashMap<String, String>) -> StorageResult<WriteResult> {
        check_metadata_budget(&metadata)?;
        self.retrying(|| async {
            let resp = self
                .client
                .put_object()
                .bucket(&self.options.bucket)
                .key(key)
                .body(ByteStream::from(body.clone()))
                .set_metadata(Some(metadata.clone()))
                .send()
                .await
                .map_err(|e| StorageError::Connection { backend: "s3".into(), cause: e.to_string() })?;
            let etag = resp.e_tag().unwrap_or_default().trim_matches('"').to_string();
            Ok(WriteResult { etag, size: body.len() as u64 })
        })
        .await
    }

    async fn get(&self, key: &str) -> StorageResult<GetResult> {
        self.retrying(|| async {
            let resp = self.client.get_object().bucket(&self.options.bucket).key(key).send().await.map_err(|e| {
                if is_not_found(&e) {
                    StorageError::NoSuchKey { key: key.to_string() }
                } else {
                    StorageError::Connection { backend: "s3".into(), cause: e.to_string() }
                }
            })?;
            let etag = resp.e_tag().unwrap_or_default().trim_matches('"').to_string();
            let metadata = resp.metadata().cloned().unwrap_or_default();
            let bytes = resp.body.collect().await.map_err(|e| anyhow::anyhow!(e))?.into_bytes();
            Ok(GetResult { content_length: bytes.len() as u64, body: bytes, metadata, etag })
        })
        .await
    }

    async fn head(&self, key: &str) -> StorageResult<HeadResult> {
        self.retrying(|| async {
            let resp = self.client.head_object().bucket(&self.options.bucket).key(key).send().await.map_err(|e| {
                if is_not_found(&e) {
                    StorageError::NoSuchKey { key: key.to_string() }
                } else {
                    StorageError::Connection { backend: "s3".into(), cause: e.to_string() }
                }
            })?;
            let etag = resp.e_tag().unwrap_or_default().trim_matches('"').to_string();
            let metadata = resp.metadata().cloned().unwrap_or_default();
            let content_length = u64::try_from(resp.content_length().unwrap_or(0)).unwrap_or(0);
            Ok(HeadResult { metadata, content_length, etag })
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.retrying(|| async {
            self.client
                .delete_object()
                .bucket(&self.options.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| StorageError::Connection { backend: "s3".into(), cause: e.to_string() })?;
            Ok(())
        })
        .await
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<ListResult> {
        if options.limit == Some(0) {
            return Ok(ListResult { keys: Vec::new(), continuation: options.continuation });
        }
        self.retrying(|| async {
            let mut req = self.client.list_objects_v2().bucket(&self.options.bucket).prefix(prefix);
            if let Some(token) = &options.continuation {
                req = req.continuation_token(token);
            }
            if let Some(limit) = options.limit {
                req = req.max_keys(i32::try_from(limit).unwrap_or(i32::MAX));
            }
            let resp = req
                .send()
                .await
                .map_err(|e| StorageError::Connection { backend: "s3".into(), cause: e.to_string() })?;
            let keys =
                resp.contents().iter().filter_map(|obj| obj.key().map(std::string::ToString::to_string)).collect();
            let continuation = resp.next_continuation_token().map(std::string::ToString::to_string);
            Ok(ListResult { keys, continuation })
        })
        .await
    }

    async fn copy(&self, src: &str, dst: &str) -> StorageResult<WriteResult> {
        self.retrying(|| async {
            let source = format!("{}/{}", self.options.bucket, src);
            let resp = self
                .client
                .copy_object()
                .bucket(&self.options.bucket)
                .copy_source(&source)
                .key(dst)
                .send()
                .await
                .map_err(|e| {
                    if is_not_found(&e) {
                        StorageError::NoSuchKey { key: src.to_string() }
                    } else {
                        StorageError::Connection { backend: "s3".into(), cause: e.to_string() }
                    }
                })?;
            let etag =
                resp.copy_object_result().and_then(|r| r.e_tag()).unwrap_or_default().trim_matches('"').to_string();
            let head = self.head(dst).await?;
            Ok(WriteResult { etag: if etag.is_empty() { head.etag } else { etag }, size: head.content_length })
        })
        .await
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E, aws_smithy_runtime_api::http::Response>) -> bool
where
    E: std::error::Error + 'static,
{
    err.raw_response().is_some_and(|r| r.status().as_u16() == 404)
}
