//! Cache refresh notifications.
//!
//! The invalidator raises one [`CacheRefreshed`] per applied payload. Observers
//! run synchronously on the applying task, after the purge has happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use uuid::Uuid;

use super::channel::{AppliedScope, ChannelId};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cache::events";

/// Monotonic per-process counter ordering refresh events.
pub type Epoch = u64;

/// Where the applied payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOrigin {
    Local,
    Remote { node: Uuid, sequence: u64 },
}

#[derive(Debug, Clone)]
pub struct CacheRefreshed {
    /// Unique per event, for log correlation.
    pub id: Uuid,
    pub epoch: Epoch,
    pub channel: ChannelId,
    pub channel_name: &'static str,
    pub origin: RefreshOrigin,
    pub scope: AppliedScope,
    pub timestamp: OffsetDateTime,
}

pub trait CacheObserver: Send + Sync {
    fn on_refreshed(&self, event: &CacheRefreshed);
}

#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn CacheObserver>>,
    epoch: AtomicU64,
}

impl ObserverRegistry {
    pub fn new(observers: Vec<Arc<dyn CacheObserver>>) -> Self {
        Self {
            observers,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(
        &self,
        channel: ChannelId,
        channel_name: &'static str,
        origin: RefreshOrigin,
        scope: AppliedScope,
    ) -> CacheRefreshed {
        let event = CacheRefreshed {
            id: Uuid::new_v4(),
            epoch: self.epoch.fetch_add(1, Ordering::SeqCst),
            channel,
            channel_name,
            origin,
            scope,
            timestamp: OffsetDateTime::now_utc(),
        };
        for observer in &self.observers {
            observer.on_refreshed(&event);
        }
        event
    }
}

/// Keeps every event it sees. Useful for tests and diagnostics.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<CacheRefreshed>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheRefreshed> {
        mutex_lock(&self.events, SOURCE, "events").clone()
    }

    pub fn count_for(&self, channel: ChannelId) -> usize {
        mutex_lock(&self.events, SOURCE, "count_for")
            .iter()
            .filter(|event| event.channel == channel)
            .count()
    }

    pub fn clear(&self) {
        mutex_lock(&self.events, SOURCE, "clear").clear();
    }
}

impl CacheObserver for RecordingObserver {
    fn on_refreshed(&self, event: &CacheRefreshed) {
        mutex_lock(&self.events, SOURCE, "on_refreshed").push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epochs_increase_and_every_observer_sees_the_event() {
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        let registry = ObserverRegistry::new(vec![first.clone(), second.clone()]);

        let a = registry.notify(
            ChannelId::CONTENT,
            "content",
            RefreshOrigin::Local,
            AppliedScope::default(),
        );
        let b = registry.notify(
            ChannelId::MEDIA,
            "media",
            RefreshOrigin::Remote {
                node: Uuid::nil(),
                sequence: 4,
            },
            AppliedScope::everything(3),
        );

        assert!(b.epoch > a.epoch);
        assert_eq!(first.events().len(), 2);
        assert_eq!(second.count_for(ChannelId::MEDIA), 1);
    }
}
