//! Programmatic events emitted by the engine (`spec.md` §6, §9).

use crate::document::Document;

/// Events published on the engine's event bus. Not wire types: these are
/// in-process notifications for plugins and internal reconcilers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A document was inserted.
    Inserted {
        /// Owning resource name.
        resource: String,
        /// Document id.
        id: String,
        /// The stored document.
        doc: Document,
    },
    /// A document was updated or patched.
    Updated {
        /// Owning resource name.
        resource: String,
        /// Document id.
        id: String,
        /// State before the update.
        before: Document,
        /// State after the update.
        after: Document,
    },
    /// A document was deleted (tombstoned or purged).
    Deleted {
        /// Owning resource name.
        resource: String,
        /// Document id.
        id: String,
        /// State before the delete.
        before: Document,
    },
    /// A partition ref pointed at a document that no longer exists or
    /// whose current partition value differs.
    PartitionDangling {
        /// Owning resource name.
        resource: String,
        /// Partition name.
        partition: String,
        /// The dangling ref's storage key.
        ref_key: String,
    },
    /// The async partition worker queue was full and a write degraded to
    /// synchronous partition updates.
    PartitionBackpressure {
        /// Owning resource name.
        resource: String,
        /// Document id of the write that degraded.
        id: String,
    },
    /// A resource's schema was upgraded.
    SchemaUpgraded {
        /// Owning resource name.
        resource: String,
        /// Previous schema version hash.
        from: String,
        /// New schema version hash.
        to: String,
    },
    /// A per-key lock was contended past the first attempt.
    LockContended {
        /// Lock scope.
        scope: String,
        /// Lock key.
        key: String,
        /// Number of retries performed before acquiring (or giving up).
        retries: u32,
    },
    /// A subscriber was too slow to keep up and events were dropped for it.
    SubscriberSlow {
        /// Subscriber name.
        name: String,
        /// Number of events dropped.
        dropped: u64,
    },
}

impl Event {
    /// The stable event-kind name, used for logging and filtering.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Inserted { .. } => "inserted",
            Event::Updated { .. } => "updated",
            Event::Deleted { .. } => "deleted",
            Event::PartitionDangling { .. } => "partition.dangling",
            Event::PartitionBackpressure { .. } => "partition.backpressure",
            Event::SchemaUpgraded { .. } => "schema.upgraded",
            Event::LockContended { .. } => "lock.contended",
            Event::SubscriberSlow { .. } => "subscriber.slow",
        }
    }
}
