//! B+-tree index storage: typed page family and the file-level search,
//! insertion (split), and deletion (redistribute/merge) algorithms.

pub mod file;
pub mod page;
pub mod types;

pub use file::{BTreeFile, BTreeFileIterator, BTreeSearchIterator};
pub use page::{
    BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePage, BTreeRootPtrPage,
};
pub use types::{BTreeEntry, IndexPredicate};
