//! Brook Commit Log - segmented append-only message log with blocking readers.
//!
//! This crate provides the storage core of a message-streaming server: an
//! append-only log of framed messages, partitioned into segments by base
//! offset, with two blocking streaming readers:
//!
//! - [`UncommittedReader`] streams every byte appended to the log, blocking
//!   at the write tail until more data arrives or the log closes.
//! - [`CommittedReader`] streams only bytes at or below the high watermark,
//!   blocking at the watermark until the replication layer advances it.
//!
//! Both readers cross segment boundaries transparently, survive segment
//! rolls, and cooperate with concurrent writers through one-shot
//! notifications - no polling, no lost wakeups.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Explicit limits**: bounded message sizes, segment sizes, retention
//! - **Explicit errors**: typed errors, no silent end-of-stream on invariant
//!   violations
//! - **No unsafe code**: Safety > Performance
//!
//! # Example
//!
//! ```ignore
//! use brook_commitlog::{Cancellation, CommitLog, LogConfig, read_message};
//! use brook_core::{Offset, MESSAGE_HEADER_SIZE};
//!
//! let log = Arc::new(CommitLog::new(LogConfig::new()));
//! log.append("payload")?;
//! log.set_high_watermark(Offset::new(0));
//!
//! let cancel = Cancellation::new();
//! let reader = log.new_committed_reader(cancel.token(), Offset::new(0))?;
//! let mut headers = [0u8; MESSAGE_HEADER_SIZE];
//! let message = read_message(&reader, &mut headers).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod log;
mod reader;
mod segment;
mod wait;

pub use error::{LogError, LogResult};
pub use log::{CommitLog, LogConfig};
pub use reader::{read_message, CommittedReader, LogStream, UncommittedReader};
pub use segment::{Segment, SegmentConfig};
pub use wait::{CancelToken, Cancellation};

/// Commit log configuration limits.
pub mod limits {
    /// Maximum size of a single message payload in bytes (1 MB).
    pub const MESSAGE_PAYLOAD_SIZE_BYTES_MAX: u32 = 1024 * 1024;

    /// Maximum size of a segment in bytes (1 GB).
    pub const SEGMENT_SIZE_BYTES_MAX: u64 = 1024 * 1024 * 1024;

    /// Maximum number of messages per segment.
    pub const MESSAGES_PER_SEGMENT_MAX: u64 = 10_000_000;

    /// Maximum number of retained segments.
    pub const SEGMENTS_MAX: u32 = 100;
}
