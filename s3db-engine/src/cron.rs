//! The Cron Manager (`spec.md` §4.8, §9 REDESIGN FLAGS: "a process-owned
//! `CronManager`/`Database`, not global singletons").
//!
//! Each database connection owns its own `CronManager`; registering a
//! named job twice cancels and replaces the previous task rather than
//! running both.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Owns the set of named interval tasks for one database connection.
/// Dropping the manager aborts every still-running job.
#[derive(Default)]
pub struct CronManager {
    jobs: DashMap<String, JoinHandle<()>>,
}

impl std::fmt::Debug for CronManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronManager").field("jobs", &self.jobs.iter().map(|e| e.key().clone()).collect::<Vec<_>>()).finish()
    }
}

impl CronManager {
    /// Register a named job that runs `task` every `interval`. Registering
    /// the same `name` again cancels the previous task first.
    pub fn register<F, Fut>(&self, name: impl Into<String>, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        self.cancel(&name);

        let job: JobFn = Arc::new(move || Box::pin(task()));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                job().await;
            }
        });
        self.jobs.insert(name, handle);
    }

    /// Cancel a named job, if registered. A no-op if the name is unknown.
    pub fn cancel(&self, name: &str) {
        if let Some((_, handle)) = self.jobs.remove(name) {
            handle.abort();
            debug!(name, "cron job cancelled");
        }
    }

    /// `true` if a job with `name` is currently registered.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Cancel every registered job, e.g. on database disconnect.
    pub fn stop_all(&self) {
        for entry in self.jobs.iter() {
            entry.value().abort();
        }
        self.jobs.clear();
        warn!("cron manager stopped all jobs");
    }
}

impl Drop for CronManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
