//! Subscriber state and the handles returned to consumers.

use super::RegistryInner;
use crate::filter::OperationFilter;
use crate::shape::ShapeKey;
use crate::types::{CacheEntry, Sequence};
use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

thread_local! {
    /// Callbacks currently running on this thread, across all subscribers.
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as inside a callback until dropped.
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        DeliveryScope
    }

    fn active() -> bool {
        DELIVERY_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Consumer callback. Receives every accepted entry that passes its filter.
pub type Callback = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// Unique identifier for a subscription within a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry-side view of one subscription.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) filter: OperationFilter,
    callback: Callback,
    active: AtomicBool,
    /// Last delivered `(epoch, sequence)`. Held for the whole delivery so
    /// deliveries to one subscriber never overlap or go backwards.
    delivered: ReentrantMutex<Cell<Option<(u64, Sequence)>>>,
}

impl Subscriber {
    pub(crate) fn new(id: SubscriptionId, filter: OperationFilter, callback: Callback) -> Self {
        Self {
            id,
            filter,
            callback,
            active: AtomicBool::new(true),
            delivered: ReentrantMutex::new(Cell::new(None)),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Invoke the callback with `entry` unless the subscriber is inactive or
    /// already saw this entry or a newer one. Panics are contained here.
    pub(crate) fn deliver(&self, entry: &CacheEntry) -> bool {
        let delivered = self.delivered.lock();
        if !self.is_active() {
            return false;
        }
        if let Some(last) = delivered.get() {
            if entry.position() <= last {
                return false;
            }
        }
        delivered.set(Some(entry.position()));

        let callback = &self.callback;
        let scope = DeliveryScope::enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(entry)));
        drop(scope);
        match outcome {
            Ok(()) => true,
            Err(payload) => {
                error!(
                    subscription = %self.id,
                    sequence = entry.sequence.0,
                    panic = %panic_message(payload.as_ref()),
                    "Subscriber callback panicked"
                );
                false
            }
        }
    }

    /// Flip to inactive. Returns `true` only for the first call.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Wait for an in-flight delivery on another thread to finish.
    ///
    /// Skipped when the current thread is itself inside a callback: two
    /// workers disposing each other's subscribers would otherwise wait on
    /// each other forever. The subscriber is already inactive, so no new
    /// delivery starts either way.
    pub(crate) fn wait_idle(&self) {
        if DeliveryScope::active() {
            return;
        }
        drop(self.delivered.lock());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct Attached {
    subscriber: Arc<Subscriber>,
    registry: Weak<RegistryInner>,
}

/// Handle owned by a consumer. Disposing it (explicitly or on drop)
/// detaches the consumer and, for the last one, tears the connection down.
pub struct SubscriptionHandle {
    id: Option<SubscriptionId>,
    key: ShapeKey,
    attached: Option<Attached>,
}

impl SubscriptionHandle {
    pub(crate) fn attached(
        key: ShapeKey,
        subscriber: Arc<Subscriber>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            id: Some(subscriber.id),
            key,
            attached: Some(Attached {
                subscriber,
                registry,
            }),
        }
    }

    /// A handle that did no registry work, e.g. for a disabled subscription.
    pub(crate) fn inert(key: ShapeKey) -> Self {
        Self {
            id: None,
            key,
            attached: None,
        }
    }

    /// `None` for inert handles.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    pub fn shape_key(&self) -> &ShapeKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.attached
            .as_ref()
            .is_some_and(|attached| attached.subscriber.is_active())
    }

    /// Detach from the registry. Idempotent.
    ///
    /// When this returns, the callback will not be invoked again. If a
    /// delivery is running on another thread, this waits for it to finish,
    /// unless called from inside a callback.
    pub fn dispose(&self) {
        let Some(attached) = &self.attached else {
            return;
        };
        if !attached.subscriber.deactivate() {
            return;
        }
        if let Some(registry) = attached.registry.upgrade() {
            registry.detach(&self.key, attached.subscriber.id);
        }
        attached.subscriber.wait_idle();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}
