//! Connection-string parsing (`spec.md` §6).
//!
//! ```text
//! s3://<ak>:<sk>@<bucket>/<prefix>?region=<r>&endpoint=<url>&forcePathStyle=<bool>
//! file://<absolute-path>
//! memory://<logical-name>/<prefix>
//! ```

use crate::error::{CoreError, CoreResult};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Which storage backend a connection string selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// AWS S3 or an S3-compatible endpoint.
    S3 {
        /// Access key id.
        access_key: String,
        /// Secret access key.
        secret_key: String,
        /// Bucket name.
        bucket: String,
        /// AWS region, if given.
        region: Option<String>,
        /// Custom endpoint URL, if given (for MinIO and similar).
        endpoint: Option<String>,
        /// Whether to force path-style addressing.
        force_path_style: bool,
    },
    /// A local filesystem directory, addressed by absolute path.
    Filesystem {
        /// Absolute filesystem path.
        path: String,
    },
    /// An in-process named store, scoped by a logical name so multiple
    /// `Database`s in one process can address distinct memory backends.
    Memory {
        /// Logical store name.
        name: String,
    },
}

/// A parsed connection string: backend selection plus the key prefix all
/// objects for this database are rooted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// The selected backend and its parameters.
    pub backend: Backend,
    /// Key prefix under which this database's objects live.
    pub prefix: String,
}

impl ConnectionString {
    /// Parse a connection string, failing with [`CoreError::UnsupportedScheme`]
    /// for unknown schemes and [`CoreError::InvalidConnectionString`] for
    /// malformed ones.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| CoreError::InvalidConnectionString(raw.to_string()))?;

        match scheme {
            "s3" => parse_s3(rest),
            "file" => parse_file(rest),
            "memory" => parse_memory(rest),
            other => Err(CoreError::UnsupportedScheme(other.to_string())),
        }
    }
}

fn parse_s3(rest: &str) -> CoreResult<ConnectionString> {
    let (authority_and_path, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let (creds, bucket_and_prefix) = authority_and_path
        .split_once('@')
        .ok_or_else(|| CoreError::InvalidConnectionString("s3 url missing '@'".to_string()))?;

    let (access_key, secret_key) = creds
        .split_once(':')
        .ok_or_else(|| CoreError::InvalidConnectionString("s3 url missing credentials".to_string()))?;

    let (bucket, prefix) = match bucket_and_prefix.split_once('/') {
        Some((b, p)) => (b, p),
        None => (bucket_and_prefix, ""),
    };
    if bucket.is_empty() {
        return Err(CoreError::InvalidConnectionString("s3 url missing bucket".to_string()));
    }

    let params = parse_query(query.unwrap_or_default());

    Ok(ConnectionString {
        backend: Backend::S3 {
            access_key: decode(access_key),
            secret_key: decode(secret_key),
            bucket: bucket.to_string(),
            region: params.get("region").cloned(),
            endpoint: params.get("endpoint").cloned(),
            force_path_style: params
                .get("forcePathStyle")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        },
        prefix: prefix.trim_end_matches('/').to_string(),
    })
}

fn parse_file(rest: &str) -> CoreResult<ConnectionString> {
    if rest.is_empty() {
        return Err(CoreError::InvalidConnectionString("file url missing path".to_string()));
    }
    Ok(ConnectionString {
        backend: Backend::Filesystem {
            path: format!("/{}", rest.trim_start_matches('/')),
        },
        prefix: String::new(),
    })
}

fn parse_memory(rest: &str) -> CoreResult<ConnectionString> {
    let (name, prefix) = match rest.split_once('/') {
        Some((n, p)) => (n, p),
        None => (rest, ""),
    };
    if name.is_empty() {
        return Err(CoreError::InvalidConnectionString("memory url missing name".to_string()));
    }
    Ok(ConnectionString {
        backend: Backend::Memory { name: name.to_string() },
        prefix: prefix.trim_end_matches('/').to_string(),
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (decode(k), decode(v)))
        .collect()
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}
