//! Value types shared by the B+-tree page family.

use crate::tuple::RecordId;
use quarry_common::{BTreePageId, Field, PredicateOp};

/// One entry of an internal B+-tree page.
///
/// Adjacent entries share a child pointer: an entry's left child is the
/// previous entry's right child. The record id names the parent-page slot
/// the entry was read from, so mutations can address it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeEntry {
    key: Field,
    left_child: BTreePageId,
    right_child: BTreePageId,
    record_id: Option<RecordId>,
}

impl BTreeEntry {
    /// Creates a new entry not yet stored on a page.
    pub fn new(key: Field, left_child: BTreePageId, right_child: BTreePageId) -> Self {
        Self {
            key,
            left_child,
            right_child,
            record_id: None,
        }
    }

    /// Returns the separating key.
    pub fn key(&self) -> &Field {
        &self.key
    }

    /// Replaces the separating key.
    pub fn set_key(&mut self, key: Field) {
        self.key = key;
    }

    /// Returns the child holding keys ≤ this entry's key.
    pub fn left_child(&self) -> BTreePageId {
        self.left_child
    }

    /// Replaces the left child pointer.
    pub fn set_left_child(&mut self, pid: BTreePageId) {
        self.left_child = pid;
    }

    /// Returns the child holding keys ≥ this entry's key.
    pub fn right_child(&self) -> BTreePageId {
        self.right_child
    }

    /// Replaces the right child pointer.
    pub fn set_right_child(&mut self, pid: BTreePageId) {
        self.right_child = pid;
    }

    /// Returns the parent-page slot this entry occupies, if stored.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    /// Sets or clears the parent-page slot.
    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }
}

impl std::fmt::Display for BTreeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} <- {} -> {}]",
            self.left_child, self.key, self.right_child
        )
    }
}

/// Predicate an indexed scan filters on: `keyField op operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPredicate {
    pub op: PredicateOp,
    pub operand: Field,
}

impl IndexPredicate {
    /// Creates a new index predicate.
    pub fn new(op: PredicateOp, operand: Field) -> Self {
        Self { op, operand }
    }

    /// Returns true if `key` satisfies this predicate.
    pub fn matches(&self, key: &Field) -> bool {
        key.compare(self.op, &self.operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::BTreePageCategory;

    fn leaf(n: u32) -> BTreePageId {
        BTreePageId::new(1, n, BTreePageCategory::Leaf)
    }

    #[test]
    fn test_entry_accessors() {
        let mut e = BTreeEntry::new(Field::Int(5), leaf(1), leaf(2));
        assert_eq!(e.key(), &Field::Int(5));
        assert_eq!(e.left_child(), leaf(1));
        assert_eq!(e.right_child(), leaf(2));
        assert!(e.record_id().is_none());

        e.set_key(Field::Int(9));
        e.set_left_child(leaf(3));
        e.set_right_child(leaf(4));
        assert_eq!(e.key(), &Field::Int(9));
        assert_eq!(e.left_child(), leaf(3));
        assert_eq!(e.right_child(), leaf(4));
    }

    #[test]
    fn test_predicate_matches() {
        let p = IndexPredicate::new(PredicateOp::GreaterThan, Field::Int(10));
        assert!(p.matches(&Field::Int(11)));
        assert!(!p.matches(&Field::Int(10)));

        let p = IndexPredicate::new(PredicateOp::Equals, Field::Int(10));
        assert!(p.matches(&Field::Int(10)));
        assert!(!p.matches(&Field::Int(9)));
    }
}
