//! The global event bus (`spec.md` §6, §9): many-producers, many-subscribers,
//! non-blocking. A slow subscriber never stalls producers; its events are
//! dropped instead, with a `subscriber.slow` warning surfaced both as a
//! `tracing` event and as a best-effort [`Event::SubscriberSlow`] event.

use dashmap::DashMap;
use s3db_model::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Default bound on each subscriber's event queue.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

struct Subscriber {
    sender: mpsc::Sender<Event>,
    dropped: AtomicU64,
}

/// The database-owned event bus every [`crate::resource::Resource`] emits
/// through and every plugin may subscribe to.
#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<String, Subscriber>,
    queue_bound: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscribers", &self.subscribers.len()).finish()
    }
}

impl EventBus {
    /// Build an event bus with the given per-subscriber queue bound.
    #[must_use]
    pub fn new(queue_bound: usize) -> Self {
        Self { subscribers: DashMap::new(), queue_bound }
    }

    /// Subscribe under `name`, returning the receiving end. Re-subscribing
    /// the same name replaces the previous subscription.
    pub fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<Event> {
        let bound = if self.queue_bound == 0 { DEFAULT_SUBSCRIBER_QUEUE } else { self.queue_bound };
        let (sender, receiver) = mpsc::channel(bound);
        self.subscribers.insert(name.into(), Subscriber { sender, dropped: AtomicU64::new(0) });
        receiver
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, name: &str) {
        self.subscribers.remove(name);
    }

    /// Publish `event` to every current subscriber, non-blocking.
    pub fn emit(&self, event: Event) {
        for entry in &self.subscribers {
            match entry.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(_) => {
                    let dropped = entry.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(subscriber = entry.key(), dropped, kind = event.kind(), "subscriber too slow, dropping event");
                    let _ = entry.sender.try_send(Event::SubscriberSlow { name: entry.key().clone(), dropped });
                }
            }
        }
    }
}
