//! # Shape Sync
//!
//! Live subscriptions to named, parameterized resources ("shapes") with a
//! reconciled, structurally-shared client cache.
//!
//! ## Core Concepts
//!
//! - **Shapes**: a resource type plus params, identified by a canonical key
//! - **Registry**: at most one upstream connection per shape, ref-counted
//!   across subscribers
//! - **Connections**: read the upstream feed, drop stale sequences,
//!   reconnect with backoff and resume from the last cursor
//! - **Reconciler**: merges each change into the cache, reusing every
//!   untouched subtree by reference
//!
//! ## Example
//!
//! ```ignore
//! use shape_sync::{ConnectionRegistry, OperationFilter, RegistryConfig, ShapeDefinition};
//!
//! let registry = ConnectionRegistry::new(Arc::new(feed), RegistryConfig::default())?;
//! let report = ShapeDefinition::new("report").param("id", "r1");
//!
//! let handle = registry.subscribe(&report, OperationFilter::all(), |entry| {
//!     if let Some(value) = entry.value() {
//!         println!("name = {:?}", value["name"]);
//!     }
//! }, true);
//!
//! // Later: releases the connection if this was the last subscriber.
//! handle.dispose();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod filter;
pub mod reconcile;
pub mod registry;
pub mod shape;
pub mod types;
pub mod value;

// Re-exports
pub use config::RegistryConfig;
pub use connection::{BackoffPolicy, Clock, ConnectionState, StreamConnection, SystemClock};
pub use error::{FeedError, Result, SyncError};
pub use feed::{
    decode_batch, decode_event, Cancellation, ChannelFeed, FeedStream, OpenRecord, ShapeFeed,
};
pub use filter::OperationFilter;
pub use reconcile::Patch;
pub use registry::{
    Callback, ConnectionRegistry, GuardedSubscription, SubscriptionHandle, SubscriptionId,
};
pub use shape::{ParamValue, ShapeDefinition, ShapeKey};
pub use types::{CacheEntry, ChangeMessage, EntryState, FeedEvent, Operation, Sequence};
pub use value::Value;
