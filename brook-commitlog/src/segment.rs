//! Log segments.
//!
//! A segment is one contiguous region of the commit log, identified by its
//! base offset (the offset of its first message). The store is append-only;
//! positions are byte offsets from the start of the segment. Once a segment
//! is sealed (rolled), appends never resume.
//!
//! Readers that reach a live segment's write tail park on the segment and
//! are woken when bytes are appended or the segment is sealed.

use std::sync::{Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use brook_core::{Message, Offset, Timestamp};

use crate::error::{LogError, LogResult};
use crate::limits;
use crate::wait::{self, WaitHandle, WaiterId, WaiterSet};

/// Configuration for individual segments.
#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    /// Maximum size of the segment store in bytes.
    pub max_size_bytes: u64,
    /// Maximum number of messages in the segment.
    pub max_messages: u64,
}

impl SegmentConfig {
    /// Creates a segment configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_size_bytes: limits::SEGMENT_SIZE_BYTES_MAX,
            max_messages: limits::MESSAGES_PER_SEGMENT_MAX,
        }
    }

    /// Sets the maximum segment size in bytes.
    #[must_use]
    pub const fn with_max_size(mut self, size: u64) -> Self {
        self.max_size_bytes = size;
        self
    }

    /// Sets the maximum number of messages per segment.
    ///
    /// Small values are useful for exercising segment rolls in tests.
    #[must_use]
    pub const fn with_max_messages(mut self, messages: u64) -> Self {
        self.max_messages = messages;
        self
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Index entry locating one message within the segment store.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexEntry {
    /// Byte position of the framed message within the segment.
    pub position: u64,
    /// Total framed size in bytes (header plus payload).
    pub size: u32,
}

/// One contiguous region of the commit log.
#[derive(Debug)]
pub struct Segment {
    base_offset: Offset,
    config: SegmentConfig,
    inner: Mutex<SegmentInner>,
}

#[derive(Debug)]
struct SegmentInner {
    /// Framed message store. Its length is the last-written position.
    data: BytesMut,
    /// Dense index: entry `i` locates offset `base + i`.
    index: Vec<IndexEntry>,
    /// Set once the segment rolls; appends never resume.
    sealed: bool,
    /// Readers parked at the write tail.
    waiters: WaiterSet,
}

impl Segment {
    /// Creates a new empty segment starting at the given offset.
    pub(crate) fn new(base_offset: Offset, config: SegmentConfig) -> Self {
        Self {
            base_offset,
            config,
            inner: Mutex::new(SegmentInner {
                data: BytesMut::new(),
                index: Vec::new(),
                sealed: false,
                waiters: WaiterSet::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SegmentInner> {
        self.inner.lock().expect("segment lock poisoned")
    }

    /// Returns the base offset (the offset of the first message).
    #[must_use]
    pub const fn base_offset(&self) -> Offset {
        self.base_offset
    }

    /// Returns the next offset this segment would assign.
    #[must_use]
    pub fn next_offset(&self) -> Offset {
        let inner = self.lock();
        Offset::new(self.base_offset.get() + inner.index.len() as u64)
    }

    /// Returns the last offset held by this segment, or `None` if empty.
    #[must_use]
    pub fn last_offset(&self) -> Option<Offset> {
        let inner = self.lock();
        inner
            .index
            .len()
            .checked_sub(1)
            .map(|i| Offset::new(self.base_offset.get() + i as u64))
    }

    /// Returns the number of messages in this segment.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.lock().index.len() as u64
    }

    /// Returns the last-written position (the store size in bytes).
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.lock().data.len() as u64
    }

    /// Returns true once the segment has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Returns the number of readers currently parked at the write tail.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Returns true if the segment can hold `framed` more bytes.
    pub(crate) fn has_space_for(&self, framed: u64) -> bool {
        let inner = self.lock();
        if inner.sealed {
            return false;
        }
        inner.data.len() as u64 + framed <= self.config.max_size_bytes
            && (inner.index.len() as u64) < self.config.max_messages
    }

    /// Appends a framed message and wakes every parked reader.
    ///
    /// # Panics
    /// Panics if the segment is sealed or `offset` is not the next
    /// sequential offset. The owning log enforces both under its lock.
    pub(crate) fn append(&self, offset: Offset, timestamp: Timestamp, payload: Bytes) {
        let mut inner = self.lock();
        assert!(!inner.sealed, "cannot append to sealed segment");

        let expected = Offset::new(self.base_offset.get() + inner.index.len() as u64);
        assert_eq!(offset, expected, "append offset must be sequential");

        let message = Message::new(offset, timestamp, payload);
        let position = inner.data.len() as u64;
        // Safe cast: payload size bounded by limits::MESSAGE_PAYLOAD_SIZE_BYTES_MAX.
        #[allow(clippy::cast_possible_truncation)]
        let size = message.encoded_len() as u32;

        message.encode(&mut inner.data);
        inner.index.push(IndexEntry { position, size });
        inner.waiters.notify_all();

        trace!(offset = offset.get(), position, size, "appended message");
    }

    /// Copies bytes from the store starting at `pos` into `buf`.
    ///
    /// Returns `Ok(0)` when `pos` has reached the last-written position.
    /// For a live segment more data may still arrive; for a sealed segment
    /// the caller should advance to the successor.
    ///
    /// # Errors
    /// Propagates store read failures unchanged.
    pub fn read_at(&self, buf: &mut [u8], pos: u64) -> LogResult<usize> {
        let inner = self.lock();
        let len = inner.data.len() as u64;
        if pos >= len || buf.is_empty() {
            return Ok(0);
        }

        // Safe casts: positions are bounded by the in-memory store size.
        #[allow(clippy::cast_possible_truncation)]
        let n = buf.len().min((len - pos) as usize);
        #[allow(clippy::cast_possible_truncation)]
        let start = pos as usize;
        buf[..n].copy_from_slice(&inner.data[start..start + n]);
        Ok(n)
    }

    /// Returns the index entry for `offset`.
    ///
    /// # Errors
    /// Returns `OffsetOutOfRange` if the segment has not assigned `offset`.
    pub(crate) fn find_entry(&self, offset: Offset) -> LogResult<IndexEntry> {
        let inner = self.lock();
        let first = self.base_offset;
        let held = inner.index.len() as u64;

        if offset < first || offset.get() >= first.get() + held {
            return Err(LogError::OffsetOutOfRange {
                offset,
                first,
                last: held
                    .checked_sub(1)
                    .map_or(first, |i| Offset::new(first.get() + i)),
            });
        }

        // Safe cast: the index length is bounded by the segment config.
        #[allow(clippy::cast_possible_truncation)]
        let idx = (offset.get() - first.get()) as usize;
        Ok(inner.index[idx])
    }

    /// Registers `waiter` to be woken when the last-written position
    /// exceeds `pos` or the segment is sealed.
    ///
    /// The check and the registration happen under the segment lock, so a
    /// racing append either is visible to the check or fires the waiter.
    pub(crate) fn wait_for_data(&self, waiter: WaiterId, pos: u64) -> WaitHandle {
        let mut inner = self.lock();
        if inner.data.len() as u64 > pos || inner.sealed {
            return wait::fired();
        }
        inner.waiters.register(waiter)
    }

    /// Deregisters `waiter`. Idempotent.
    pub(crate) fn remove_waiter(&self, waiter: WaiterId) {
        self.lock().waiters.remove(waiter);
    }

    /// Seals the segment and wakes every parked reader.
    pub(crate) fn seal(&self) {
        let mut inner = self.lock();
        inner.sealed = true;
        inner.waiters.notify_all();
    }
}
