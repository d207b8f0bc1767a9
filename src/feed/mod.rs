//! Upstream feed boundary.
//!
//! A feed opens a blocking stream of [`FeedEvent`]s for one shape. The engine
//! does not care about the transport (long-poll, SSE, WebSocket); it only
//! needs `open` and an iterator that ends or errors on disconnect. Each open
//! receives a [`Cancellation`]; a stream must end promptly once it fires, so
//! a torn-down shape never keeps its upstream stream alive.
//!
//! - [`ChannelFeed`]: in-memory transport, driven by pushing events
//! - [`wire`]: decoder for shape-stream JSON messages

mod channel;
pub mod wire;

pub use channel::{ChannelFeed, OpenRecord};
pub use wire::{decode_batch, decode_event};

use crate::error::FeedError;
use crate::shape::ShapeDefinition;
use crate::types::{FeedEvent, Sequence};
use crossbeam_channel::{Receiver, TryRecvError};

/// Blocking stream of feed events. `None` means the upstream hung up.
pub type FeedStream = Box<dyn Iterator<Item = Result<FeedEvent, FeedError>> + Send>;

/// Fires when the connection that opened a stream is stopped.
///
/// Cancellation is signalled by disconnecting the channel, so every clone
/// observes it. Blocking streams should wait on [`receiver`](Self::receiver)
/// alongside their transport, e.g. with `crossbeam_channel::select!`.
#[derive(Clone, Debug)]
pub struct Cancellation {
    signal: Receiver<()>,
}

impl Cancellation {
    /// Cancelled once every sender of `signal` is dropped.
    pub fn new(signal: Receiver<()>) -> Self {
        Self { signal }
    }

    /// A token that never fires.
    pub fn never() -> Self {
        Self {
            signal: crossbeam_channel::never(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Becomes ready (with an error) once cancelled.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// Opens upstream change streams.
pub trait ShapeFeed: Send + Sync {
    /// Open a stream for `shape`.
    ///
    /// With a `cursor`, the upstream should resume after that sequence, or
    /// fail with [`FeedError::CursorRejected`] if it cannot. The returned
    /// stream must end once `cancel` fires.
    fn open(
        &self,
        shape: &ShapeDefinition,
        cursor: Option<Sequence>,
        cancel: Cancellation,
    ) -> Result<FeedStream, FeedError>;
}

impl<F> ShapeFeed for F
where
    F: Fn(&ShapeDefinition, Option<Sequence>, Cancellation) -> Result<FeedStream, FeedError>
        + Send
        + Sync,
{
    fn open(
        &self,
        shape: &ShapeDefinition,
        cursor: Option<Sequence>,
        cancel: Cancellation,
    ) -> Result<FeedStream, FeedError> {
        self(shape, cursor, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_cancellation_fires_on_disconnect() {
        let (tx, rx) = unbounded::<()>();
        let cancel = Cancellation::new(rx);
        let clone = cancel.clone();
        assert!(!cancel.is_cancelled());

        drop(tx);
        assert!(cancel.is_cancelled());
        assert!(clone.is_cancelled());
        assert!(clone.receiver().recv().is_err());
    }

    #[test]
    fn test_never_is_not_cancelled() {
        assert!(!Cancellation::never().is_cancelled());
    }
}
