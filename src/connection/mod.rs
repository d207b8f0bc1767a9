//! Upstream connections.
//!
//! Each live shape has exactly one [`StreamConnection`]. It reads the feed
//! on its own thread, drops stale sequences, reconciles accepted messages
//! into the shape's cache and fans the result out to subscribers.
//!
//! Reconnects use capped exponential backoff with jitter and resume from
//! the last applied sequence. When the upstream cannot resume, the
//! connection performs a full resync and bumps the cache epoch.

mod backoff;
mod state;
mod stream;

pub use backoff::{BackoffPolicy, Clock, SystemClock};
pub use state::ConnectionState;
pub use stream::StreamConnection;
