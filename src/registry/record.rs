//! Per-shape shared state: reconciled cache plus attached subscribers.

use super::handle::{Subscriber, SubscriptionId};
use crate::connection::StreamConnection;
use crate::shape::ShapeKey;
use crate::types::CacheEntry;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// State shared between the registry and the shape's connection worker.
///
/// The cache is written only by the worker. Subscribers are added and
/// removed only by the registry.
pub(crate) struct ShapeState {
    key: ShapeKey,
    handle: String,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    cache: RwLock<Option<CacheEntry>>,
}

impl ShapeState {
    pub(crate) fn new(key: ShapeKey) -> Self {
        let handle = key.handle();
        Self {
            key,
            handle,
            subscribers: RwLock::new(Vec::new()),
            cache: RwLock::new(None),
        }
    }

    pub(crate) fn key(&self) -> &ShapeKey {
        &self.key
    }

    pub(crate) fn handle(&self) -> &str {
        &self.handle
    }

    pub(crate) fn current(&self) -> Option<CacheEntry> {
        self.cache.read().clone()
    }

    /// Drop the cached entry ahead of a full resync.
    pub(crate) fn clear(&self) {
        *self.cache.write() = None;
    }

    /// Store `entry` and hand it to every subscriber whose filter accepts
    /// its operation. Callbacks run on a snapshot with no lock held, so they
    /// may subscribe or unsubscribe freely.
    pub(crate) fn publish(&self, entry: CacheEntry) -> usize {
        *self.cache.write() = Some(entry.clone());

        let snapshot: Vec<Arc<Subscriber>> = self.subscribers.read().clone();
        let mut delivered = 0;
        for subscriber in snapshot {
            if !subscriber.filter.accepts(entry.operation) {
                continue;
            }
            if subscriber.deliver(&entry) {
                delivered += 1;
            }
        }

        debug!(
            shape = %self.handle,
            sequence = entry.sequence.0,
            operation = %entry.operation,
            delivered,
            "Published entry"
        );
        delivered
    }

    pub(crate) fn attach(&self, subscriber: Arc<Subscriber>) -> usize {
        let mut subs = self.subscribers.write();
        subs.push(subscriber);
        subs.len()
    }

    /// Remove a subscriber; returns how many remain.
    pub(crate) fn detach(&self, id: SubscriptionId) -> usize {
        let mut subs = self.subscribers.write();
        subs.retain(|sub| sub.id != id);
        subs.len()
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Subscriber>> {
        std::mem::take(&mut *self.subscribers.write())
    }
}

/// Registry entry for one live shape.
///
/// The ref count is the number of attached subscribers; a record is removed
/// in the same call that detaches its last subscriber.
pub(crate) struct ConnectionRecord {
    pub(crate) state: Arc<ShapeState>,
    pub(crate) connection: StreamConnection,
}

impl ConnectionRecord {
    pub(crate) fn ref_count(&self) -> usize {
        self.state.ref_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::OperationFilter;
    use crate::reconcile;
    use crate::shape::ShapeDefinition;
    use crate::types::ChangeMessage;
    use parking_lot::Mutex;
    use serde_json::json;

    fn state() -> ShapeState {
        ShapeState::new(ShapeDefinition::new("report").param("id", "r1").key())
    }

    fn recorder(id: u64, filter: OperationFilter) -> (Arc<Subscriber>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = Subscriber::new(
            SubscriptionId(id),
            filter,
            Arc::new(move |entry: &CacheEntry| sink.lock().push(entry.sequence.0)),
        );
        (Arc::new(sub), seen)
    }

    #[test]
    fn test_publish_respects_filters() {
        let state = state();
        let (all, all_seen) = recorder(1, OperationFilter::all());
        let (deletes, delete_seen) = recorder(2, OperationFilter::deletes());
        state.attach(all);
        state.attach(deletes);

        let first = reconcile::apply(None, &ChangeMessage::insert(json!({"a": 1}), 1));
        let second = reconcile::apply(Some(&first), &ChangeMessage::delete(2));
        state.publish(first);
        state.publish(second);

        assert_eq!(*all_seen.lock(), vec![1, 2]);
        assert_eq!(*delete_seen.lock(), vec![2]);
        assert_eq!(state.current().unwrap().sequence.0, 2);
    }

    #[test]
    fn test_subscriber_never_goes_backwards() {
        let (sub, seen) = recorder(1, OperationFilter::all());
        let newer = reconcile::apply(None, &ChangeMessage::insert(json!({}), 5));
        let older = reconcile::apply(None, &ChangeMessage::insert(json!({}), 4));

        assert!(sub.deliver(&newer));
        assert!(!sub.deliver(&older));
        assert!(!sub.deliver(&newer));
        assert_eq!(*seen.lock(), vec![5]);

        // A new epoch restarts the sequence space.
        let mut resynced = older.clone();
        resynced.epoch = 1;
        assert!(sub.deliver(&resynced));
    }

    #[test]
    fn test_detach_counts() {
        let state = state();
        let (a, _) = recorder(1, OperationFilter::all());
        let (b, _) = recorder(2, OperationFilter::all());
        assert_eq!(state.attach(a), 1);
        assert_eq!(state.attach(b), 2);
        assert_eq!(state.detach(SubscriptionId(1)), 1);
        assert_eq!(state.detach(SubscriptionId(1)), 1);
        assert_eq!(state.detach(SubscriptionId(2)), 0);
    }
}
