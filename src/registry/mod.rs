//! Connection registry: one ref-counted upstream connection per shape.
//!
//! # Example
//!
//! ```ignore
//! let registry = ConnectionRegistry::new(Arc::new(feed), RegistryConfig::default())?;
//!
//! let report = ShapeDefinition::new("report").param("id", "r1");
//! let handle = registry.subscribe(&report, OperationFilter::updates(), |entry| {
//!     println!("report is now {:?}", entry.value());
//! }, true);
//!
//! // Last handle for the shape: the connection is torn down.
//! handle.dispose();
//! ```

mod guarded;
mod handle;
mod record;

pub use guarded::GuardedSubscription;
pub use handle::{Callback, SubscriptionHandle, SubscriptionId};

pub(crate) use handle::Subscriber;
pub(crate) use record::ShapeState;

use crate::config::RegistryConfig;
use crate::connection::{Clock, ConnectionState, StreamConnection, SystemClock};
use crate::error::Result;
use crate::feed::ShapeFeed;
use crate::filter::OperationFilter;
use crate::shape::{ShapeDefinition, ShapeKey};
use crate::types::CacheEntry;
use parking_lot::Mutex;
use record::ConnectionRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) struct RegistryInner {
    feed: Arc<dyn ShapeFeed>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    records: Mutex<HashMap<ShapeKey, ConnectionRecord>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RegistryInner {
    fn attach(
        self: &Arc<Self>,
        definition: &ShapeDefinition,
        filter: OperationFilter,
        callback: Callback,
    ) -> SubscriptionHandle {
        let key = definition.key();
        if self.closed.load(Ordering::Acquire) {
            warn!(key = %key, "Subscribe on a shut down registry ignored");
            return SubscriptionHandle::inert(key);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscriber = Arc::new(Subscriber::new(id, filter, callback));

        let state = {
            let mut records = self.records.lock();
            match records.get(&key) {
                Some(record) => {
                    let count = record.state.attach(Arc::clone(&subscriber));
                    debug!(
                        shape = %record.state.handle(),
                        subscription = %id,
                        ref_count = count,
                        "Attached to live connection"
                    );
                    Arc::clone(&record.state)
                }
                None => {
                    let state = Arc::new(ShapeState::new(key.clone()));
                    state.attach(Arc::clone(&subscriber));
                    let connection = StreamConnection::new(
                        definition.clone(),
                        Arc::clone(&state),
                        Arc::clone(&self.feed),
                        Arc::clone(&self.clock),
                        &self.config,
                    );
                    if let Err(e) = connection.start() {
                        error!(key = %key, error = %e, "Failed to start connection");
                    }
                    records.insert(
                        key.clone(),
                        ConnectionRecord {
                            state: Arc::clone(&state),
                            connection,
                        },
                    );
                    state
                }
            }
        };

        // Replay-on-join, outside the registry lock.
        if let Some(entry) = state.current() {
            subscriber.deliver(&entry);
        }

        SubscriptionHandle::attached(key, subscriber, Arc::downgrade(self))
    }

    pub(crate) fn detach(&self, key: &ShapeKey, id: SubscriptionId) {
        let removed = {
            let mut records = self.records.lock();
            let Some(record) = records.get(key) else {
                return;
            };
            let remaining = record.state.detach(id);
            if remaining > 0 {
                debug!(
                    shape = %record.state.handle(),
                    subscription = %id,
                    ref_count = remaining,
                    "Detached subscriber"
                );
                return;
            }
            records.remove(key)
        };

        // Stopping and dropping happen outside the registry lock.
        if let Some(record) = removed {
            record.connection.stop();
            info!(
                shape = %record.state.handle(),
                key = %key,
                "Last subscriber left, connection torn down"
            );
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let records: Vec<ConnectionRecord> = self.records.lock().drain().map(|(_, r)| r).collect();
        for record in &records {
            record.connection.stop();
            for subscriber in record.state.drain() {
                subscriber.deactivate();
            }
        }
        if !records.is_empty() {
            info!(connections = records.len(), "Registry shut down");
        }
    }
}

/// Table of live shape connections.
///
/// Cloning is cheap and yields another handle to the same table.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Registry over `feed` using the wall clock for backoff.
    pub fn new(feed: Arc<dyn ShapeFeed>, config: RegistryConfig) -> Result<Self> {
        Self::with_clock(feed, config, Arc::new(SystemClock))
    }

    /// Registry with an injected clock. Fails if `config` does not validate.
    pub fn with_clock(
        feed: Arc<dyn ShapeFeed>,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                feed,
                clock,
                config,
                records: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Subscribe to a shape.
    ///
    /// With `enabled == false` this returns an inert handle and does no
    /// registry or network work. Otherwise the first subscriber for a shape
    /// starts its connection, later ones share it. If the shape already has
    /// a cached entry, `on_change` receives it before this returns.
    pub fn subscribe<F>(
        &self,
        definition: &ShapeDefinition,
        filter: OperationFilter,
        on_change: F,
        enabled: bool,
    ) -> SubscriptionHandle
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        self.subscribe_with(definition, filter, Arc::new(on_change), enabled)
    }

    /// Same as [`subscribe`](Self::subscribe) with a shared callback.
    pub fn subscribe_with(
        &self,
        definition: &ShapeDefinition,
        filter: OperationFilter,
        callback: Callback,
        enabled: bool,
    ) -> SubscriptionHandle {
        if !enabled {
            return SubscriptionHandle::inert(definition.key());
        }
        self.inner.attach(definition, filter, callback)
    }

    /// Dispose `handle`. No-op for inactive handles.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.dispose();
    }

    /// Controller for a subscription that is switched on and off over time.
    pub fn guarded<F>(
        &self,
        definition: ShapeDefinition,
        filter: OperationFilter,
        on_change: F,
    ) -> GuardedSubscription
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        GuardedSubscription::new(self.clone(), definition, filter, Arc::new(on_change))
    }

    /// Number of attached subscribers for `key` (0 if none).
    pub fn ref_count(&self, key: &ShapeKey) -> usize {
        self.inner
            .records
            .lock()
            .get(key)
            .map_or(0, ConnectionRecord::ref_count)
    }

    pub fn contains(&self, key: &ShapeKey) -> bool {
        self.inner.records.lock().contains_key(key)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn connection_state(&self, key: &ShapeKey) -> Option<ConnectionState> {
        self.inner
            .records
            .lock()
            .get(key)
            .map(|record| record.connection.state())
    }

    /// Latest reconciled entry for `key`.
    pub fn current(&self, key: &ShapeKey) -> Option<CacheEntry> {
        let state = self
            .inner
            .records
            .lock()
            .get(key)
            .map(|record| Arc::clone(&record.state));
        state.and_then(|state| state.current())
    }

    /// Stop every connection and deactivate every subscriber. Later
    /// subscribes return inert handles.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
