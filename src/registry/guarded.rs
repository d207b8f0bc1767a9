//! Subscriptions that follow an `enabled` flag.

use super::{Callback, ConnectionRegistry, SubscriptionHandle};
use crate::filter::OperationFilter;
use crate::shape::ShapeDefinition;

/// Keeps a subscription in sync with an `enabled` flag and a definition
/// that may change over time, e.g. "subscribe once the report id is known".
///
/// Enabling subscribes, disabling fully disposes (the connection is released
/// if this was its last subscriber). Changing the definition while enabled
/// moves the subscription to the new shape.
pub struct GuardedSubscription {
    registry: ConnectionRegistry,
    definition: ShapeDefinition,
    filter: OperationFilter,
    callback: Callback,
    handle: Option<SubscriptionHandle>,
}

impl GuardedSubscription {
    pub(crate) fn new(
        registry: ConnectionRegistry,
        definition: ShapeDefinition,
        filter: OperationFilter,
        callback: Callback,
    ) -> Self {
        Self {
            registry,
            definition,
            filter,
            callback,
            handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    pub fn definition(&self) -> &ShapeDefinition {
        &self.definition
    }

    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.handle.is_some()) {
            (true, false) => {
                self.handle = Some(self.registry.subscribe_with(
                    &self.definition,
                    self.filter,
                    self.callback.clone(),
                    true,
                ));
            }
            (false, true) => {
                if let Some(handle) = self.handle.take() {
                    handle.dispose();
                }
            }
            _ => {}
        }
    }

    /// Switch to another shape. No-op when the definition is unchanged.
    pub fn set_definition(&mut self, definition: ShapeDefinition) {
        if definition == self.definition {
            return;
        }
        let was_enabled = self.is_enabled();
        self.set_enabled(false);
        self.definition = definition;
        self.set_enabled(was_enabled);
    }
}

impl Drop for GuardedSubscription {
    fn drop(&mut self) {
        self.set_enabled(false);
    }
}
