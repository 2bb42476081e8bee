//! QuarryDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all QuarryDB
//! components: page identity types, field and transaction types, the error
//! enum, and the slot-bitmap helpers every slotted page format shares.

pub mod error;
pub mod page;
pub mod types;

pub use error::{QuarryError, Result};
pub use page::{
    clear_slot, set_slot, slot_is_set, stable_table_id, BTreePageCategory, BTreePageId,
    HeapPageId, PageId,
};
pub use types::{Field, FieldType, PredicateOp, TransactionId, STRING_LEN};
