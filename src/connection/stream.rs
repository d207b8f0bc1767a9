//! One upstream change stream per shape.

use super::backoff::{BackoffPolicy, Clock};
use super::state::ConnectionState;
use crate::config::RegistryConfig;
use crate::error::{FeedError, Result};
use crate::feed::{Cancellation, FeedStream, ShapeFeed};
use crate::reconcile;
use crate::registry::ShapeState;
use crate::shape::{ShapeDefinition, ShapeKey};
use crate::types::{ChangeMessage, FeedEvent, Sequence};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// State visible to both the owner and the worker thread.
struct Control {
    state: Mutex<ConnectionState>,
    cursor: Mutex<Option<Sequence>>,
    epoch: Mutex<u64>,
    /// Dropped on close. Disconnecting wakes backoff waits and cancels the
    /// open feed stream.
    stop_tx: Mutex<Option<Sender<()>>>,
}

impl Control {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Apply a transition. Illegal ones are logged and refused.
    fn advance(&self, shape: &str, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == to {
            return true;
        }
        match state.transition(to) {
            Ok(next) => {
                debug!(shape, from = ?*state, to = ?next, "Connection state change");
                *state = next;
                true
            }
            Err(e) => {
                if !state.is_closed() {
                    warn!(shape, error = %e, "Refused connection transition");
                }
                false
            }
        }
    }

    fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.is_closed() {
            return false;
        }
        *state = ConnectionState::Closed;
        drop(state);
        self.stop_tx.lock().take();
        true
    }
}

/// Owns the worker thread that reads one shape's upstream feed.
///
/// Stopping is synchronous on the call: the state flips to `Closed` and any
/// backoff wait is woken. The worker is never joined from `stop`, because
/// `stop` may run on the worker itself through a subscriber callback.
pub struct StreamConnection {
    key: ShapeKey,
    handle: String,
    control: Arc<Control>,
    launch: Mutex<Option<Worker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    pub(crate) fn new(
        definition: ShapeDefinition,
        shape: Arc<ShapeState>,
        feed: Arc<dyn ShapeFeed>,
        clock: Arc<dyn Clock>,
        config: &RegistryConfig,
    ) -> Self {
        let key = shape.key().clone();
        let handle = shape.handle().to_string();
        let (stop_tx, stop_rx) = bounded(0);
        let control = Arc::new(Control {
            state: Mutex::new(ConnectionState::Idle),
            cursor: Mutex::new(None),
            epoch: Mutex::new(0),
            stop_tx: Mutex::new(Some(stop_tx)),
        });

        let worker = Worker {
            definition,
            handle: handle.clone(),
            shape,
            feed,
            clock,
            backoff: config.backoff(),
            auto_reconnect: config.auto_reconnect,
            max_attempts: config.max_reconnect_attempts,
            control: Arc::clone(&control),
            stop_rx,
            last_applied: None,
            epoch: 0,
        };

        Self {
            key,
            handle,
            control,
            launch: Mutex::new(Some(worker)),
            thread: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &ShapeKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.control.state()
    }

    /// Last applied sequence, used as the resume cursor.
    pub fn cursor(&self) -> Option<Sequence> {
        *self.control.cursor.lock()
    }

    /// Number of full resyncs so far.
    pub fn epoch(&self) -> u64 {
        *self.control.epoch.lock()
    }

    /// `Idle -> Connecting` and spawn the worker. A second call is a no-op.
    pub fn start(&self) -> Result<()> {
        let Some(worker) = self.launch.lock().take() else {
            return Ok(());
        };
        if !self.control.advance(&self.handle, ConnectionState::Connecting) {
            return Ok(());
        }

        let spawned = thread::Builder::new()
            .name(format!("shape-{}", self.handle))
            .spawn(move || worker.run());
        match spawned {
            Ok(join) => {
                *self.thread.lock() = Some(join);
                info!(shape = %self.handle, key = %self.key, "Connection started");
                Ok(())
            }
            Err(e) => {
                self.control.close();
                Err(e.into())
            }
        }
    }

    /// Move to `Closed` and stop retrying. Idempotent.
    pub fn stop(&self) {
        // Never started: drop the unused worker along with the connection.
        self.launch.lock().take();
        if self.control.close() {
            info!(shape = %self.handle, "Connection stopped");
        }
    }

    /// Wait for the worker thread to exit. No-op from the worker itself.
    ///
    /// The worker exits promptly once stopped: stopping cancels the open
    /// feed stream, which drops it on the way out.
    pub fn join(&self) {
        let join = {
            let mut slot = self.thread.lock();
            match slot.as_ref() {
                Some(join) if join.thread().id() == thread::current().id() => return,
                _ => slot.take(),
            }
        };
        if let Some(join) = join {
            let _ = join.join();
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why a stream stopped yielding.
enum StreamEnd {
    Stopped,
    Disconnected(Option<FeedError>),
    Resync,
}

/// What the next open follows.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Retry {
    Reconnect,
    Resync,
}

struct Worker {
    definition: ShapeDefinition,
    handle: String,
    shape: Arc<ShapeState>,
    feed: Arc<dyn ShapeFeed>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    auto_reconnect: bool,
    max_attempts: Option<u32>,
    control: Arc<Control>,
    stop_rx: Receiver<()>,
    last_applied: Option<Sequence>,
    epoch: u64,
}

impl Worker {
    fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.control.is_closed() {
                break;
            }

            // Cleared by a resync, so the next open starts from scratch.
            let cursor = self.last_applied;
            let cancel = Cancellation::new(self.stop_rx.clone());

            let retry = match self.feed.open(&self.definition, cursor, cancel) {
                Ok(stream) => {
                    debug!(shape = %self.handle, cursor = ?cursor, "Feed opened");
                    match self.consume(stream, &mut attempt) {
                        StreamEnd::Stopped => break,
                        StreamEnd::Resync => {
                            self.resync();
                            Retry::Resync
                        }
                        StreamEnd::Disconnected(Some(e)) => {
                            warn!(shape = %self.handle, error = %e, "Feed disconnected");
                            Retry::Reconnect
                        }
                        StreamEnd::Disconnected(None) => {
                            debug!(shape = %self.handle, "Feed ended");
                            Retry::Reconnect
                        }
                    }
                }
                // Rejecting a cursor-less open is treated as a plain failure.
                Err(FeedError::CursorRejected { cursor }) if self.last_applied.is_some() => {
                    info!(shape = %self.handle, cursor = %cursor, "Cursor rejected, resyncing");
                    self.resync();
                    Retry::Resync
                }
                Err(e) => {
                    warn!(shape = %self.handle, attempt, error = %e, "Feed open failed");
                    Retry::Reconnect
                }
            };

            // Resyncs back off like failures until the stream is live again,
            // but are not subject to `auto_reconnect`.
            if retry == Retry::Reconnect && !self.auto_reconnect {
                info!(shape = %self.handle, "Auto-reconnect disabled, closing");
                break;
            }
            if let Some(max) = self.max_attempts {
                if attempt >= max {
                    error!(
                        shape = %self.handle,
                        attempts = attempt,
                        "Reconnect attempts exhausted"
                    );
                    break;
                }
            }
            if !self.control.advance(&self.handle, ConnectionState::Reconnecting) {
                break;
            }

            let delay = self.backoff.delay(attempt, self.entropy(attempt));
            debug!(
                shape = %self.handle,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnect"
            );
            attempt = attempt.saturating_add(1);
            if !self.clock.wait(delay, &self.stop_rx) {
                break;
            }
        }

        self.control.close();
        debug!(shape = %self.handle, "Worker exiting");
    }

    fn consume(&mut self, stream: FeedStream, attempt: &mut u32) -> StreamEnd {
        for item in stream {
            if self.control.is_closed() {
                return StreamEnd::Stopped;
            }
            match item {
                Ok(FeedEvent::Change(message)) => {
                    if !self.mark_live(attempt) {
                        return StreamEnd::Stopped;
                    }
                    self.accept(message);
                }
                Ok(FeedEvent::UpToDate) => {
                    if !self.mark_live(attempt) {
                        return StreamEnd::Stopped;
                    }
                }
                Ok(FeedEvent::MustRefetch) => {
                    info!(shape = %self.handle, "Upstream requested refetch");
                    if !self.control.advance(&self.handle, ConnectionState::Reconnecting) {
                        return StreamEnd::Stopped;
                    }
                    return StreamEnd::Resync;
                }
                Err(FeedError::Malformed(reason)) => {
                    warn!(shape = %self.handle, reason = %reason, "Dropping malformed message");
                }
                Err(FeedError::CursorRejected { cursor }) if self.last_applied.is_some() => {
                    info!(shape = %self.handle, cursor = %cursor, "Cursor rejected, resyncing");
                    if !self.control.advance(&self.handle, ConnectionState::Reconnecting) {
                        return StreamEnd::Stopped;
                    }
                    return StreamEnd::Resync;
                }
                Err(e) => return StreamEnd::Disconnected(Some(e)),
            }
        }

        if self.control.is_closed() {
            StreamEnd::Stopped
        } else {
            StreamEnd::Disconnected(None)
        }
    }

    fn mark_live(&self, attempt: &mut u32) -> bool {
        if !self.control.advance(&self.handle, ConnectionState::Live) {
            return false;
        }
        *attempt = 0;
        true
    }

    /// Sequence guard, reconcile, then fan out.
    fn accept(&mut self, message: ChangeMessage) {
        if let Some(last) = self.last_applied {
            if message.sequence <= last {
                debug!(
                    shape = %self.handle,
                    sequence = message.sequence.0,
                    last_applied = last.0,
                    "Dropping stale message"
                );
                return;
            }
        }

        let previous = self.shape.current();
        let mut next = reconcile::apply(previous.as_ref(), &message);
        next.epoch = self.epoch;

        self.last_applied = Some(message.sequence);
        *self.control.cursor.lock() = self.last_applied;

        if self.control.is_closed() {
            return;
        }
        self.shape.publish(next);
    }

    /// Forget everything; the next snapshot is authoritative.
    fn resync(&mut self) {
        self.shape.clear();
        self.last_applied = None;
        self.epoch += 1;
        *self.control.cursor.lock() = None;
        *self.control.epoch.lock() = self.epoch;
        info!(shape = %self.handle, epoch = self.epoch, "Full resync");
    }

    fn entropy(&self, attempt: u32) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.handle.hash(&mut hasher);
        attempt.hash(&mut hasher);
        self.clock.entropy().hash(&mut hasher);
        hasher.finish()
    }
}
