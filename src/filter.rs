//! Operation filters for subscribers.

use crate::types::Operation;

/// Which operation kinds a subscriber wants to be notified about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationFilter {
    insert: bool,
    update: bool,
    delete: bool,
}

impl OperationFilter {
    /// Accept every operation.
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }

    /// Accept nothing. Useful as a starting point for builders.
    pub fn none() -> Self {
        Self {
            insert: false,
            update: false,
            delete: false,
        }
    }

    pub fn only(operations: impl IntoIterator<Item = Operation>) -> Self {
        operations.into_iter().fold(Self::none(), Self::with)
    }

    pub fn inserts() -> Self {
        Self::none().with(Operation::Insert)
    }

    pub fn updates() -> Self {
        Self::none().with(Operation::Update)
    }

    pub fn deletes() -> Self {
        Self::none().with(Operation::Delete)
    }

    pub fn with(mut self, operation: Operation) -> Self {
        match operation {
            Operation::Insert => self.insert = true,
            Operation::Update => self.update = true,
            Operation::Delete => self.delete = true,
        }
        self
    }

    pub fn without(mut self, operation: Operation) -> Self {
        match operation {
            Operation::Insert => self.insert = false,
            Operation::Update => self.update = false,
            Operation::Delete => self.delete = false,
        }
        self
    }

    pub fn accepts(&self, operation: Operation) -> bool {
        match operation {
            Operation::Insert => self.insert,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

impl Default for OperationFilter {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepts_everything() {
        let filter = OperationFilter::default();
        for op in Operation::ALL {
            assert!(filter.accepts(op));
        }
    }

    #[test]
    fn test_only() {
        let filter = OperationFilter::only([Operation::Insert, Operation::Delete]);
        assert!(filter.accepts(Operation::Insert));
        assert!(!filter.accepts(Operation::Update));
        assert!(filter.accepts(Operation::Delete));
    }

    #[test]
    fn test_without() {
        let filter = OperationFilter::all().without(Operation::Update);
        assert!(!filter.accepts(Operation::Update));
        assert!(filter.accepts(Operation::Insert));
    }
}
