//! Storage engine for QuarryDB.
//!
//! This crate provides the page-organized table implementations at the
//! core of the engine:
//! - Tuples, descriptors, and the on-disk field codec
//! - Heap pages and the unordered heap file
//! - The B+-tree page family and the ordered index file, including the
//!   split/redistribute/merge maintenance algorithms
//! - The text loader converting delimited input into binary heap pages
//!
//! All page access from mutations is routed through `quarry-buffer` so
//! page-level locking is honored; operations report the pages they dirtied
//! for a surrounding transaction layer to flush.

pub mod btree;
pub mod heap;
pub mod tuple;

pub use btree::{
    BTreeEntry, BTreeFile, BTreeFileIterator, BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage,
    BTreePage, BTreeRootPtrPage, BTreeSearchIterator, IndexPredicate,
};
pub use heap::{HeapFile, HeapFileIterator, HeapPage, HeapPageIter};
pub use tuple::{RecordId, Tuple, TupleDesc};
