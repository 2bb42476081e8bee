//! Field types, field values, and transaction identifiers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// On-disk length of the padded portion of a STRING field.
///
/// Strings longer than this are truncated by the loader; shorter strings
/// are zero-padded so every STRING field occupies the same number of bytes.
pub const STRING_LEN: usize = 128;

/// Identifier for the field types supported by QuarryDB tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FieldType {
    /// 32-bit signed integer, 4 bytes on disk.
    Int = 1,
    /// Fixed-width string: a 4-byte length prefix plus STRING_LEN bytes.
    Str = 2,
}

impl FieldType {
    /// Returns the number of bytes a field of this type occupies on disk.
    pub fn size(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => 4 + STRING_LEN,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Int => "INT",
            FieldType::Str => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operators for predicates over fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateOp {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
}

/// A single field value conforming to a [`FieldType`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// Returns the type of this field.
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Compares this field against another under the given operator.
    ///
    /// Fields of different types never compare equal and order Int < Str,
    /// matching the ordering derived below.
    pub fn compare(&self, op: PredicateOp, other: &Field) -> bool {
        let ord = self.partial_cmp(other).unwrap_or(std::cmp::Ordering::Less);
        match op {
            PredicateOp::Equals => ord == std::cmp::Ordering::Equal,
            PredicateOp::NotEquals => ord != std::cmp::Ordering::Equal,
            PredicateOp::GreaterThan => ord == std::cmp::Ordering::Greater,
            PredicateOp::GreaterThanOrEq => ord != std::cmp::Ordering::Less,
            PredicateOp::LessThan => ord == std::cmp::Ordering::Less,
            PredicateOp::LessThanOrEq => ord != std::cmp::Ordering::Greater,
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Str(a), Field::Str(b)) => a.cmp(b),
            (Field::Int(_), Field::Str(_)) => std::cmp::Ordering::Less,
            (Field::Str(_), Field::Int(_)) => std::cmp::Ordering::Greater,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Opaque identifier for a transaction.
///
/// Minted from a process-wide counter; the storage engine only threads it
/// through to the buffer pool's lock manager and dirty-page bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

impl TransactionId {
    /// Mints a fresh transaction id.
    pub fn new() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}
