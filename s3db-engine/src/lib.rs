//! The resource engine: schema-bound CRUD over an object-store-backed
//! document database, plus the surrounding ambient machinery (locking,
//! partitions, hooks, plugins, cron, events) the Database Controller
//! wires together at connect time.

pub mod behavior;
pub mod cron;
pub mod database;
pub mod error;
pub mod events;
pub mod hooks;
pub mod lock;
pub mod partition;
pub mod plugin;
pub mod resource;
pub mod secret;

pub use database::{Database, ResourceSpec};
pub use error::{EngineError, EngineResult};
pub use events::EventBus;
pub use hooks::{AfterWriteHook, DeleteHook, HookContext, HookError, HookRegistry, ListHook, WriteHook};
pub use lock::{LockError, LockGuard, LockManager};
pub use plugin::{Plugin, PluginError, PluginRegistry};
pub use resource::{Page, PageOptions, Query, Resource};
pub use secret::{SecretCipher, SecretError};
