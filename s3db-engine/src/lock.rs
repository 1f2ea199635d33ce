//! Per-key locking (`spec.md` §5): an in-process advisory lock plus an
//! optional distributed soft lock realized as a short-lived lease object.
//!
//! Mirrors the teacher's pattern of a typed state struct per concern
//! (`ruststack-s3-core::state::object::ObjectVersion`) applied to lock
//! leases instead of object versions.

use dashmap::DashMap;
use s3db_core::EngineConfig;
use s3db_storage::{StorageClient, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// A short-lived distributed lock record, persisted at
/// `<prefix>/locks/<scope>/<hash>` when a [`LockManager`] is given a
/// storage client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Opaque id of whoever holds the lease.
    pub owner: String,
    /// When the lease was acquired.
    pub acquired_at: chrono::DateTime<chrono::Utc>,
    /// When the lease expires and may be stolen.
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Free-form purpose, carried for debugging (`spec.md` §5: "Lock
    /// purpose is carried in metadata to aid debugging").
    pub purpose: String,
}

impl Lease {
    fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at <= now
    }
}

/// An error raised while trying to acquire a lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock could not be acquired within the configured retry budget.
    #[error("lock timeout on {scope}/{key} after {waited_ms}ms")]
    Timeout {
        /// Lock scope.
        scope: String,
        /// Lock key.
        key: String,
        /// Milliseconds spent retrying before giving up.
        waited_ms: u64,
    },
    /// The distributed lease store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Held while a guard is alive; released (in-process and, if applicable,
/// the distributed lease deleted) on drop via the owning manager's
/// `release` call driven by the guard's `Drop` impl.
pub struct LockGuard {
    scope: String,
    key: String,
    _inproc: OwnedMutexGuard<()>,
    manager: Option<Arc<LockInner>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.clone() {
            let scope = self.scope.clone();
            let key = self.key.clone();
            tokio::spawn(async move {
                manager.release_lease(&scope, &key).await;
            });
        }
    }
}

struct LockInner {
    storage: Option<Arc<dyn StorageClient>>,
    prefix: String,
}

impl LockInner {
    fn lease_key(&self, scope: &str, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = hex::encode(hasher.finalize());
        format!("{}/locks/{scope}/{hash}", self.prefix.trim_end_matches('/'))
    }

    async fn release_lease(&self, scope: &str, key: &str) {
        let Some(storage) = &self.storage else { return };
        let lease_key = self.lease_key(scope, key);
        if let Err(e) = storage.delete(&lease_key).await {
            warn!(scope, key, error = %e, "failed to release distributed lease");
        }
    }
}

/// Owns the per-key advisory locks for one database connection and,
/// optionally, a storage-backed distributed soft lock layered on top.
pub struct LockManager {
    inproc: DashMap<String, Arc<Mutex<()>>>,
    inner: Arc<LockInner>,
    retry_attempts: u32,
    retry_base: Duration,
    lease_ttl: Duration,
    owner: String,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager").field("held", &self.inproc.len()).finish_non_exhaustive()
    }
}

impl LockManager {
    /// Build a lock manager using only in-process advisory locks (no
    /// distributed lease; suitable for a single-process `Database`).
    #[must_use]
    pub fn local(config: &EngineConfig) -> Self {
        Self::new(None, String::new(), config)
    }

    /// Build a lock manager that also persists a distributed lease object
    /// through `storage`, rooted at `prefix`.
    #[must_use]
    pub fn with_storage(storage: Arc<dyn StorageClient>, prefix: impl Into<String>, config: &EngineConfig) -> Self {
        Self::new(Some(storage), prefix.into(), config)
    }

    fn new(storage: Option<Arc<dyn StorageClient>>, prefix: String, config: &EngineConfig) -> Self {
        Self {
            inproc: DashMap::new(),
            inner: Arc::new(LockInner { storage, prefix }),
            retry_attempts: config.lock_retry_attempts,
            retry_base: Duration::from_millis(config.lock_retry_base_ms),
            lease_ttl: Duration::from_millis(config.lock_timeout_ms),
            owner: {
                use s3db_core::IdGenerator;
                s3db_core::UuidGenerator.generate()
            },
        }
    }

    /// Acquire the lock for `(scope, key)`, retrying the distributed lease
    /// (if configured) per `spec.md` §5's bounded-retry shape. Returns the
    /// number of retries performed, for `lock.contended` event emission.
    pub async fn acquire(&self, scope: &str, key: &str, purpose: &str) -> Result<(LockGuard, u32), LockError> {
        let mutex = self.inproc.entry(format!("{scope}:{key}")).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let inproc_guard = mutex.lock_owned().await;

        let mut retries = 0;
        if let Some(storage) = &self.inner.storage {
            let lease_key = self.inner.lease_key(scope, key);
            loop {
                match self.try_acquire_lease(storage.as_ref(), &lease_key, purpose).await {
                    Ok(true) => break,
                    Ok(false) if retries + 1 >= self.retry_attempts => {
                        return Err(LockError::Timeout {
                            scope: scope.to_string(),
                            key: key.to_string(),
                            waited_ms: backoff_total_ms(self.retry_base, retries),
                        });
                    }
                    Ok(false) => {
                        retries += 1;
                        tokio::time::sleep(jittered_backoff(self.retry_base, retries)).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok((
            LockGuard {
                scope: scope.to_string(),
                key: key.to_string(),
                _inproc: inproc_guard,
                manager: self.inner.storage.is_some().then(|| self.inner.clone()),
            },
            retries,
        ))
    }

    async fn try_acquire_lease(
        &self,
        storage: &dyn StorageClient,
        lease_key: &str,
        purpose: &str,
    ) -> Result<bool, StorageError> {
        let now = chrono::Utc::now();
        if let Ok(existing) = storage.get(lease_key).await {
            if let Ok(lease) = serde_json::from_slice::<Lease>(&existing.body) {
                if !lease.is_expired(now) && lease.owner != self.owner {
                    return Ok(false);
                }
            }
        }

        let lease =
            Lease { owner: self.owner.clone(), acquired_at: now, expires_at: now + self.lease_ttl, purpose: purpose.to_string() };
        let body = serde_json::to_vec(&lease).expect("lease serializes");
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("_purpose".to_string(), purpose.to_string());
        storage.put(lease_key, bytes::Bytes::from(body), metadata).await?;
        debug!(lease_key, "acquired distributed lease");
        Ok(true)
    }
}

fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(Duration::from_secs(5).as_millis());
    use rand::Rng;
    let jittered = rand::rng().random_range(0..=capped.max(1));
    Duration::from_millis(u64::try_from(jittered).unwrap_or(u64::MAX))
}

fn backoff_total_ms(base: Duration, attempts: u32) -> u64 {
    (0..attempts).map(|a| jittered_backoff(base, a).as_millis() as u64).sum()
}
