//! Tagged patches describing which parts of a cached value changed.

use crate::value::{Fields, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A description of how to turn a previous value into the next one.
///
/// Building a patch never touches the previous value; [`Patch::apply`]
/// freezes it into a new tree that reuses every `Keep` subtree by reference.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    /// Reuse the previous value as-is.
    Keep,
    /// Use this value.
    Replace(Arc<Value>),
    /// Drop the value (a field, or the whole entry at the root).
    Remove,
    /// Patch individual object fields; unlisted fields are kept.
    Fields(BTreeMap<String, Patch>),
}

impl Patch {
    pub fn is_keep(&self) -> bool {
        match self {
            Patch::Keep => true,
            Patch::Fields(fields) => fields.values().all(Patch::is_keep),
            _ => false,
        }
    }

    /// Paths (dot-joined) this patch touches.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            Patch::Keep => {}
            Patch::Replace(_) | Patch::Remove => out.push(prefix.to_string()),
            Patch::Fields(fields) => {
                for (name, patch) in fields {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}.{name}")
                    };
                    patch.collect_paths(&path, out);
                }
            }
        }
    }

    /// Freeze the patch against `previous`. `None` means absent.
    pub fn apply(&self, previous: Option<&Arc<Value>>) -> Option<Arc<Value>> {
        match self {
            Patch::Keep => previous.cloned(),
            Patch::Replace(value) => Some(Arc::clone(value)),
            Patch::Remove => None,
            Patch::Fields(changes) => {
                if self.is_keep() {
                    if let Some(prev) = previous {
                        return Some(Arc::clone(prev));
                    }
                }

                // Draft: shallow copy of the field table, children still shared.
                let mut draft: Fields = match previous.map(|p| p.as_ref()) {
                    Some(Value::Object(fields)) => fields.clone(),
                    _ => Fields::new(),
                };

                for (name, change) in changes {
                    match change.apply(draft.get(name)) {
                        Some(next) => {
                            draft.insert(name.clone(), next);
                        }
                        None => {
                            draft.remove(name);
                        }
                    }
                }

                Some(Arc::new(Value::Object(draft)))
            }
        }
    }
}

/// Patch that replaces `previous` with `next`, reusing equal subtrees.
pub fn replace(previous: Option<&Arc<Value>>, next: &Arc<Value>) -> Patch {
    let Some(prev) = previous else {
        return Patch::Replace(Arc::clone(next));
    };

    if Arc::ptr_eq(prev, next) || prev.as_ref() == next.as_ref() {
        return Patch::Keep;
    }

    match (prev.as_ref(), next.as_ref()) {
        (Value::Object(old), Value::Object(new)) => {
            let mut fields = BTreeMap::new();
            for (name, value) in new {
                let patch = replace(old.get(name), value);
                if !patch.is_keep() {
                    fields.insert(name.clone(), patch);
                }
            }
            for name in old.keys() {
                if !new.contains_key(name) {
                    fields.insert(name.clone(), Patch::Remove);
                }
            }
            Patch::Fields(fields)
        }
        (Value::Array(old), Value::Array(new)) => {
            let items = new
                .iter()
                .enumerate()
                .map(|(i, item)| match replace(old.get(i), item).apply(old.get(i)) {
                    Some(shared) => shared,
                    None => Arc::clone(item),
                })
                .collect();
            Patch::Replace(Arc::new(Value::Array(items)))
        }
        _ => Patch::Replace(Arc::clone(next)),
    }
}

/// Patch that merges the fields of `partial` into `previous`.
///
/// Fields missing from `partial` are kept. Non-object values replace.
pub fn merge(previous: Option<&Arc<Value>>, partial: &Arc<Value>) -> Patch {
    match (previous.map(|p| p.as_ref()), partial.as_ref()) {
        (Some(Value::Object(old)), Value::Object(new)) => {
            let mut fields = BTreeMap::new();
            for (name, value) in new {
                let patch = replace(old.get(name), value);
                if !patch.is_keep() {
                    fields.insert(name.clone(), patch);
                }
            }
            Patch::Fields(fields)
        }
        _ => replace(previous, partial),
    }
}
