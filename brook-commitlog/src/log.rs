//! The commit log.
//!
//! A [`CommitLog`] owns an ordered list of segments and the high
//! watermark. Producers append framed messages and the log assigns
//! offsets; the replication layer advances the watermark once messages
//! are committed; readers take segment-list snapshots and park either at
//! a segment's write tail or on the watermark.
//!
//! Rolling: when the active segment is full, it is sealed and a new
//! segment is created at the next offset. Sealing wakes readers parked at
//! the old tail so they can follow the roll. Retention drops the oldest
//! segments once the configured count is exceeded.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info};

use brook_core::{Offset, Timestamp, MESSAGE_HEADER_SIZE};

use crate::error::{LogError, LogResult};
use crate::limits;
use crate::segment::{Segment, SegmentConfig};
use crate::wait::{self, WaitHandle, WaiterId, WaiterSet};

/// Configuration for a commit log.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Configuration for individual segments.
    pub segment: SegmentConfig,
    /// Maximum number of retained segments. A roll that exceeds this
    /// count drops the oldest segment, advancing the oldest offset.
    pub max_segments: u32,
}

impl LogConfig {
    /// Creates a log configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segment: SegmentConfig::new(),
            max_segments: limits::SEGMENTS_MAX,
        }
    }

    /// Sets the segment configuration.
    #[must_use]
    pub const fn with_segment_config(mut self, segment: SegmentConfig) -> Self {
        self.segment = segment;
        self
    }

    /// Sets the maximum number of retained segments.
    #[must_use]
    pub const fn with_max_segments(mut self, max_segments: u32) -> Self {
        self.max_segments = max_segments;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An append-only, segmented log of framed messages.
///
/// # Thread Safety
///
/// All methods take `&self`; the log is meant to live in an `Arc` shared
/// by producers, the replication layer, and readers. Internal state is
/// guarded by the log's own lock, never held across an `.await`.
#[derive(Debug)]
pub struct CommitLog {
    config: LogConfig,
    inner: Mutex<LogInner>,
    closed_tx: watch::Sender<bool>,
}

#[derive(Debug)]
struct LogInner {
    /// Segments ordered by strictly increasing base offset; never empty.
    segments: Vec<Arc<Segment>>,
    /// Next offset the log will assign.
    next_offset: Offset,
    /// Highest committed offset; `None` until replication commits one.
    high_watermark: Option<Offset>,
    /// Readers parked on the watermark.
    hw_waiters: WaiterSet,
    /// Set once; appends are rejected afterwards.
    closed: bool,
}

impl CommitLog {
    /// Creates an empty log with a single segment at base offset 0.
    ///
    /// # Panics
    /// Panics if the configuration allows zero segments or zero messages
    /// per segment.
    #[must_use]
    pub fn new(config: LogConfig) -> Self {
        assert!(config.max_segments >= 1, "log needs at least one segment");
        assert!(
            config.segment.max_messages >= 1,
            "segments must hold at least one message"
        );

        let segment = Arc::new(Segment::new(Offset::new(0), config.segment));
        let (closed_tx, _rx) = watch::channel(false);
        Self {
            config,
            inner: Mutex::new(LogInner {
                segments: vec![segment],
                next_offset: Offset::new(0),
                high_watermark: None,
                hw_waiters: WaiterSet::default(),
                closed: false,
            }),
            closed_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().expect("log lock poisoned")
    }

    /// Appends a message, assigning it the next offset and the current
    /// wall-clock timestamp.
    ///
    /// # Errors
    /// `Closed` after [`close`](Self::close); `MessageTooLarge` if the
    /// payload exceeds the message limit.
    pub fn append(&self, payload: impl Into<Bytes>) -> LogResult<Offset> {
        self.append_with_timestamp(payload, Timestamp::now())
    }

    /// Appends a message with an explicit timestamp.
    ///
    /// # Errors
    /// `Closed` after [`close`](Self::close); `MessageTooLarge` if the
    /// payload exceeds the message limit.
    pub fn append_with_timestamp(
        &self,
        payload: impl Into<Bytes>,
        timestamp: Timestamp,
    ) -> LogResult<Offset> {
        let payload = payload.into();
        if payload.len() > limits::MESSAGE_PAYLOAD_SIZE_BYTES_MAX as usize {
            return Err(LogError::MessageTooLarge {
                size: payload.len(),
                max: limits::MESSAGE_PAYLOAD_SIZE_BYTES_MAX as usize,
            });
        }
        let framed = (MESSAGE_HEADER_SIZE + payload.len()) as u64;

        let mut inner = self.lock();
        if inner.closed {
            return Err(LogError::Closed);
        }

        let active = Arc::clone(inner.segments.last().expect("segment list is never empty"));
        let segment = if active.has_space_for(framed) || active.message_count() == 0 {
            active
        } else {
            self.roll(&mut inner)
        };

        let offset = inner.next_offset;
        segment.append(offset, timestamp, payload);
        inner.next_offset = offset.next();

        debug!(offset = offset.get(), bytes = framed, "appended message");
        Ok(offset)
    }

    /// Seals the active segment and starts a new one at the next offset.
    fn roll(&self, inner: &mut LogInner) -> Arc<Segment> {
        let active = inner.segments.last().expect("segment list is never empty");
        active.seal();
        info!(
            base_offset = active.base_offset().get(),
            messages = active.message_count(),
            "sealed segment"
        );

        let segment = Arc::new(Segment::new(inner.next_offset, self.config.segment));
        info!(base_offset = segment.base_offset().get(), "created segment");
        inner.segments.push(Arc::clone(&segment));

        // Retention: drop the oldest segments beyond the limit.
        while inner.segments.len() > self.config.max_segments as usize {
            let dropped = inner.segments.remove(0);
            debug!(
                base_offset = dropped.base_offset().get(),
                "dropped segment past retention"
            );
        }

        segment
    }

    /// Returns a snapshot of the current segment list.
    ///
    /// The snapshot is stable for the duration of a read pass; the live
    /// list may grow underneath it but the snapshotted segments remain
    /// valid.
    #[must_use]
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.lock().segments.clone()
    }

    /// Returns the segment list and high watermark from a single instant.
    pub(crate) fn reader_snapshot(&self) -> (Vec<Arc<Segment>>, Option<Offset>) {
        let inner = self.lock();
        (inner.segments.clone(), inner.high_watermark)
    }

    /// Returns the high watermark, or `None` when nothing is committed.
    #[must_use]
    pub fn high_watermark(&self) -> Option<Offset> {
        self.lock().high_watermark
    }

    /// Returns the smallest readable offset.
    #[must_use]
    pub fn oldest_offset(&self) -> Offset {
        self.lock()
            .segments
            .first()
            .expect("segment list is never empty")
            .base_offset()
    }

    /// Returns the next offset the log will assign (the write tail).
    #[must_use]
    pub fn next_offset(&self) -> Offset {
        self.lock().next_offset
    }

    /// Returns true if no message has ever been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().next_offset.get() == 0
    }

    /// Advances the high watermark and wakes readers parked on it.
    ///
    /// The watermark is monotone: a value at or below the current one is
    /// ignored.
    ///
    /// # Panics
    /// Panics if `hw` is at or past the write tail; only appended
    /// messages can be committed.
    pub fn set_high_watermark(&self, hw: Offset) {
        let mut inner = self.lock();
        assert!(
            hw < inner.next_offset,
            "watermark cannot pass the write tail"
        );
        if inner.high_watermark.is_some_and(|current| hw <= current) {
            return;
        }

        inner.high_watermark = Some(hw);
        inner.hw_waiters.notify_all();
        debug!(hw = hw.get(), "advanced high watermark");
    }

    /// Registers `waiter` to be woken when the watermark moves away from
    /// `last_seen`.
    ///
    /// The check and the registration happen under the log lock, so a
    /// racing advance either is visible to the check or fires the waiter.
    pub(crate) fn wait_for_hw(&self, waiter: WaiterId, last_seen: Option<Offset>) -> WaitHandle {
        let mut inner = self.lock();
        if inner.high_watermark != last_seen || inner.closed {
            return wait::fired();
        }
        inner.hw_waiters.register(waiter)
    }

    /// Deregisters `waiter` from the watermark waiter set. Idempotent.
    pub(crate) fn remove_hw_waiter(&self, waiter: WaiterId) {
        self.lock().hw_waiters.remove(waiter);
    }

    /// Returns the number of readers currently parked on the watermark.
    #[must_use]
    pub fn hw_waiter_count(&self) -> usize {
        self.lock().hw_waiters.len()
    }

    /// Closes the log: seals every segment, wakes all parked readers, and
    /// rejects further appends. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for segment in &inner.segments {
            segment.seal();
        }
        inner.hw_waiters.notify_all();
        drop(inner);

        let _ = self.closed_tx.send(true);
        info!("closed commit log");
    }

    /// Returns true once the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resolves once the log has been closed.
    pub(crate) async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
