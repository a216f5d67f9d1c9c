//! Commit log error types.
//!
//! All errors are explicit and typed. Orderly termination of a streaming
//! read (cancellation or log close) is not an error; it is signaled by a
//! zero-byte read.

use brook_core::Offset;
use thiserror::Error;

/// Result type for commit log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur during commit log operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    /// No segment in the current list covers the offset.
    #[error("no segment contains offset {offset}")]
    SegmentNotFound {
        /// The offset that could not be located.
        offset: Offset,
    },

    /// The segment exists but has not assigned the offset.
    #[error("offset {offset} out of range (valid range: {first}..={last})")]
    OffsetOutOfRange {
        /// Requested offset.
        offset: Offset,
        /// First offset held by the segment.
        first: Offset,
        /// Last offset held by the segment (equal to `first` when empty).
        last: Offset,
    },

    /// A framed-message decode hit the end of input mid-record.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// A committed read needed a successor segment below the high
    /// watermark and found none. The segment list violated its invariant.
    #[error("no segment follows base offset {base_offset} below the high watermark")]
    NoNextSegment {
        /// Base offset of the segment with the missing successor.
        base_offset: Offset,
    },

    /// The log has been closed; appends never resume.
    #[error("commit log is closed")]
    Closed,

    /// Message payload exceeds the maximum size.
    #[error("message too large: {size} bytes exceeds max {max} bytes")]
    MessageTooLarge {
        /// Actual payload size in bytes.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// I/O error from the underlying store, passed through opaquely.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl LogError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }
}
