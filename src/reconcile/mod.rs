//! Reconciliation of change messages into cache entries.
//!
//! `apply` is pure: it diffs the message against the previous entry into a
//! [`Patch`], then freezes the patch into a new value tree. Everything the
//! message did not touch stays reference-identical to the previous entry.
//!
//! - `insert` replaces the value (equal subtrees are still reused)
//! - `update` merges the message's fields into the previous value
//! - `delete` yields [`EntryState::Removed`]
//!
//! Messages carrying a row `key` address one row inside an object root, so a
//! keyed shape caches `{row_key: row}`. A keyed delete removes just that row.

mod patch;

pub use patch::{merge, replace, Patch};

use crate::types::{CacheEntry, ChangeMessage, EntryState, Operation};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the patch that `message` applies to `previous`.
pub fn diff(previous: Option<&Arc<Value>>, message: &ChangeMessage) -> Patch {
    let incoming = Arc::new(message.value.clone());

    match &message.key {
        None => match message.operation {
            Operation::Insert => replace(previous, &incoming),
            Operation::Update => merge(previous, &incoming),
            Operation::Delete => Patch::Remove,
        },
        Some(row_key) => {
            let row = previous.and_then(|root| root.get(row_key));
            let row_patch = match message.operation {
                Operation::Insert => replace(row, &incoming),
                Operation::Update => merge(row, &incoming),
                Operation::Delete => Patch::Remove,
            };
            let mut fields = BTreeMap::new();
            fields.insert(row_key.clone(), row_patch);
            Patch::Fields(fields)
        }
    }
}

/// Apply `message` on top of `previous`, producing the next entry.
///
/// The previous entry is never modified. The epoch is carried over.
pub fn apply(previous: Option<&CacheEntry>, message: &ChangeMessage) -> CacheEntry {
    let prev_value = previous.and_then(CacheEntry::value);
    let patch = diff(prev_value, message);

    let state = match patch.apply(prev_value) {
        Some(value) => EntryState::Present(value),
        None => EntryState::Removed,
    };

    CacheEntry {
        state,
        sequence: message.sequence,
        epoch: previous.map_or(0, |entry| entry.epoch),
        operation: message.operation,
    }
}
