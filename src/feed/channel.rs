//! In-memory feed driven through crossbeam channels.

use super::{Cancellation, FeedStream, ShapeFeed};
use crate::error::FeedError;
use crate::shape::{ShapeDefinition, ShapeKey};
use crate::types::{FeedEvent, Sequence};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Item {
    Event(Result<FeedEvent, FeedError>),
    Hangup,
}

/// One stream generation for a shape.
struct Lane {
    sender: Sender<Item>,
    receiver: Receiver<Item>,
    /// Whether an `open` call already took this lane.
    opened: bool,
}

impl Lane {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            opened: false,
        }
    }
}

/// A recorded `open` call.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenRecord {
    pub key: ShapeKey,
    pub cursor: Option<Sequence>,
}

#[derive(Default)]
struct FeedState {
    lanes: HashMap<ShapeKey, Lane>,
    opens: Vec<OpenRecord>,
    /// Fail the next N opens with a transport error.
    failing_opens: u32,
    reject_cursors: bool,
}

/// Feed whose events are pushed by the caller.
///
/// Events pushed before the connection opens are buffered. Each `open`
/// starts a new stream generation: the previous iterator for the same shape
/// ends once its buffered events are drained, and any stream ends as soon as
/// its [`Cancellation`] fires.
///
/// Meant for tests and demos: lanes are kept for every shape ever pushed to
/// or opened, so memory grows with the number of distinct shapes.
#[derive(Clone, Default)]
pub struct ChannelFeed {
    state: Arc<Mutex<FeedState>>,
    opened: Arc<Condvar>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the shape's current stream.
    pub fn push(&self, key: &ShapeKey, event: impl Into<FeedEvent>) {
        self.send(key, Item::Event(Ok(event.into())));
    }

    /// Queue an error for the shape's current stream.
    pub fn fail(&self, key: &ShapeKey, error: FeedError) {
        self.send(key, Item::Event(Err(error)));
    }

    /// End the shape's current stream. Later pushes go to the next stream.
    pub fn disconnect(&self, key: &ShapeKey) {
        let mut state = self.state.lock();
        let opened = state.lanes.get(key).is_some_and(|lane| lane.opened);
        if opened {
            if let Some(old) = state.lanes.insert(key.clone(), Lane::new()) {
                let _ = old.sender.send(Item::Hangup);
            }
        }
    }

    /// Make the next `count` opens fail with a transport error.
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().failing_opens = count;
    }

    /// Reject every open that carries a cursor.
    pub fn reject_cursors(&self, reject: bool) {
        self.state.lock().reject_cursors = reject;
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.lock().opens.clone()
    }

    pub fn open_count(&self, key: &ShapeKey) -> usize {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|open| &open.key == key)
            .count()
    }

    /// Block until `key` has been opened at least `count` times.
    pub fn wait_for_opens(&self, key: &ShapeKey, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let seen = state.opens.iter().filter(|open| &open.key == key).count();
            if seen >= count {
                return true;
            }
            if self.opened.wait_until(&mut state, deadline).timed_out() {
                return state.opens.iter().filter(|open| &open.key == key).count() >= count;
            }
        }
    }

    fn send(&self, key: &ShapeKey, item: Item) {
        let mut state = self.state.lock();
        let lane = state.lanes.entry(key.clone()).or_insert_with(Lane::new);
        // The lane holds its own receiver, so the send cannot fail.
        let _ = lane.sender.send(item);
    }
}

impl ShapeFeed for ChannelFeed {
    fn open(
        &self,
        shape: &ShapeDefinition,
        cursor: Option<Sequence>,
        cancel: Cancellation,
    ) -> Result<FeedStream, FeedError> {
        let key = shape.key();
        let mut state = self.state.lock();
        state.opens.push(OpenRecord {
            key: key.clone(),
            cursor,
        });
        self.opened.notify_all();

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(FeedError::Transport("connection refused".into()));
        }
        if let (Some(cursor), true) = (cursor, state.reject_cursors) {
            return Err(FeedError::CursorRejected { cursor });
        }

        let reuse = state.lanes.get(&key).is_some_and(|lane| !lane.opened);
        if !reuse {
            // Dropping the old lane ends any iterator still reading from it.
            state.lanes.insert(key.clone(), Lane::new());
        }
        let lane = state
            .lanes
            .get_mut(&key)
            .ok_or(FeedError::Closed)?;
        lane.opened = true;

        let receiver = lane.receiver.clone();
        Ok(Box::new(std::iter::from_fn(move || {
            select! {
                recv(receiver) -> item => match item {
                    Ok(Item::Event(event)) => Some(event),
                    Ok(Item::Hangup) | Err(_) => None,
                },
                recv(cancel.receiver()) -> _ => None,
            }
        })))
    }
}
