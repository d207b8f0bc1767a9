//! Core types for change messages and cache entries.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position in a connection's change stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of change carried by a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incremental change from the upstream feed.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeMessage {
    pub operation: Operation,

    /// Row key for keyed row-set shapes. `None` addresses the whole resource.
    pub key: Option<String>,

    /// Affected payload. Updates may carry only the changed fields.
    pub value: Value,

    pub sequence: Sequence,
}

impl ChangeMessage {
    pub fn insert(value: impl Into<Value>, sequence: u64) -> Self {
        Self::new(Operation::Insert, value, sequence)
    }

    pub fn update(value: impl Into<Value>, sequence: u64) -> Self {
        Self::new(Operation::Update, value, sequence)
    }

    pub fn delete(sequence: u64) -> Self {
        Self::new(Operation::Delete, Value::Null, sequence)
    }

    pub fn new(operation: Operation, value: impl Into<Value>, sequence: u64) -> Self {
        Self {
            operation,
            key: None,
            value: value.into(),
            sequence: Sequence(sequence),
        }
    }

    /// Address a single row of a keyed shape.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Event yielded by an upstream feed.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Change(ChangeMessage),
    /// The upstream has delivered everything it currently has.
    UpToDate,
    /// The upstream discarded its log; the client must refetch from scratch.
    MustRefetch,
}

impl From<ChangeMessage> for FeedEvent {
    fn from(message: ChangeMessage) -> Self {
        FeedEvent::Change(message)
    }
}

/// Reconciled state of a shape.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryState {
    Present(Arc<Value>),
    /// The resource was deleted upstream.
    Removed,
}

/// The reconciled value for one shape, as handed to subscribers.
///
/// Cloning is cheap: the value tree is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub state: EntryState,
    /// Sequence of the last applied message.
    pub sequence: Sequence,
    /// Incremented on every full resync of the connection.
    pub epoch: u64,
    /// Operation of the last applied message.
    pub operation: Operation,
}

impl CacheEntry {
    pub fn value(&self) -> Option<&Arc<Value>> {
        match &self.state {
            EntryState::Present(value) => Some(value),
            EntryState::Removed => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self.state, EntryState::Removed)
    }

    /// Ordering position used for monotonic per-subscriber delivery.
    pub(crate) fn position(&self) -> (u64, Sequence) {
        (self.epoch, self.sequence)
    }
}
