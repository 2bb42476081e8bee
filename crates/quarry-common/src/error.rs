//! Error types for QuarryDB.

use thiserror::Error;

/// Result type alias using QuarryError.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Errors that can occur in QuarryDB storage operations.
///
/// Four kinds surface at the file boundary: I/O failures, transaction
/// aborts relayed from the lock manager, malformed arguments (bad page
/// ids, short reads), and semantic violations on otherwise well-formed
/// pages.
#[derive(Debug, Error)]
pub enum QuarryError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    // Semantic violations (the DbException family)
    #[error("page full, unable to insert tuple")]
    PageFull,

    #[error("tuple slot {0} is already empty")]
    EmptySlot(u16),

    #[error("tuple is not on this page")]
    TupleNotOnPage,

    #[error("tuple descriptor mismatch")]
    DescriptorMismatch,

    #[error("wrong page category: expected {expected}, got {actual}")]
    WrongPageCategory {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("malformed tree: {0}")]
    MalformedTree(String),

    // Transaction errors
    #[error("transaction aborted")]
    TransactionAborted,

    // Argument errors
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: QuarryError = io_err.into();
        assert!(matches!(err, QuarryError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_short_read_display() {
        let err = QuarryError::ShortRead {
            expected: 4096,
            actual: 100,
        };
        assert_eq!(err.to_string(), "short read: expected 4096 bytes, got 100");
    }

    #[test]
    fn test_page_full_display() {
        assert_eq!(
            QuarryError::PageFull.to_string(),
            "page full, unable to insert tuple"
        );
    }

    #[test]
    fn test_empty_slot_display() {
        assert_eq!(
            QuarryError::EmptySlot(7).to_string(),
            "tuple slot 7 is already empty"
        );
    }

    #[test]
    fn test_wrong_page_category_display() {
        let err = QuarryError::WrongPageCategory {
            expected: "leaf",
            actual: "internal",
        };
        assert_eq!(
            err.to_string(),
            "wrong page category: expected leaf, got internal"
        );
    }

    #[test]
    fn test_malformed_tree_display() {
        let err = QuarryError::MalformedTree("internal page has no entries".to_string());
        assert_eq!(err.to_string(), "malformed tree: internal page has no entries");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(QuarryError::TransactionAborted)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QuarryError>();
    }
}
