//! Blocking streaming readers over the commit log.
//!
//! Two readers share the same shape: a non-owning handle to the log, a
//! cancellation token, and a mutex-serialized `(segment, position)` cursor
//! advanced by `read` calls. [`UncommittedReader`] follows the write tail;
//! [`CommittedReader`] additionally clamps every read to the high
//! watermark.
//!
//! A read call loops over positional reads, rolling to the successor
//! segment at each sealed tail. When no progress is possible it parks - at
//! the segment tail or on the watermark - racing the wakeup against the
//! reader's cancellation token and the log's closed signal. Orderly
//! termination returns the bytes accumulated so far; every later read
//! returns `Ok(0)`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tracing::trace;

use brook_core::{Message, MessageHeader, Offset, MESSAGE_HEADER_SIZE};

use crate::error::{LogError, LogResult};
use crate::log::CommitLog;
use crate::segment::Segment;
use crate::wait::{CancelToken, WaiterId};

/// A blocking byte stream over framed log data.
///
/// `read` follows `std::io::Read` short-read semantics: `Ok(n)` with
/// `n < buf.len()` does not imply the end of the stream. `Ok(0)` on a
/// non-empty buffer signals orderly termination - cancellation or log
/// close - and never occurs mid-log otherwise.
#[async_trait]
pub trait LogStream: Send + Sync {
    /// Reads at most `buf.len()` bytes into `buf`, blocking at the log's
    /// edge until bytes arrive or a control signal fires.
    ///
    /// # Errors
    /// Construction-surviving faults only: storage errors and segment-list
    /// invariant violations. Cancellation and close are not errors.
    async fn read(&self, buf: &mut [u8]) -> LogResult<usize>;
}

/// Reads one framed message from `stream`, blocking until it is complete.
///
/// `headers_buf` is caller-supplied scratch for the fixed header so a
/// draining loop does not allocate per message; it must hold at least
/// [`MESSAGE_HEADER_SIZE`] bytes. The payload is freshly allocated.
///
/// This routine is stateless and reentrant.
///
/// # Errors
/// Returns [`LogError::EndOfStream`] if the stream terminates before the
/// header or payload is complete; any other read error is propagated
/// unchanged.
///
/// # Panics
/// Panics if `headers_buf` is smaller than [`MESSAGE_HEADER_SIZE`].
pub async fn read_message<S>(stream: &S, headers_buf: &mut [u8]) -> LogResult<Message>
where
    S: LogStream + ?Sized,
{
    assert!(
        headers_buf.len() >= MESSAGE_HEADER_SIZE,
        "headers buffer too small"
    );

    read_full(stream, &mut headers_buf[..MESSAGE_HEADER_SIZE]).await?;
    let header = MessageHeader::decode(&mut &headers_buf[..MESSAGE_HEADER_SIZE]);

    let mut payload = BytesMut::zeroed(header.size as usize);
    read_full(stream, &mut payload).await?;

    Ok(Message::new(header.offset, header.timestamp, payload.freeze()))
}

/// Fills `buf` completely or fails with `EndOfStream`.
async fn read_full<S>(stream: &S, buf: &mut [u8]) -> LogResult<()>
where
    S: LogStream + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(LogError::EndOfStream);
        }
        filled += n;
    }
    Ok(())
}

/// Returns the segment covering `offset` - the one with the greatest base
/// at or below it - and its index in the snapshot. Returns `None` when
/// `offset` precedes the earliest retained base.
pub(crate) fn find_segment(
    segments: &[Arc<Segment>],
    offset: Offset,
) -> Option<(Arc<Segment>, usize)> {
    let idx = segments.partition_point(|s| s.base_offset() <= offset);
    idx.checked_sub(1).map(|i| (Arc::clone(&segments[i]), i))
}

/// Returns the first segment whose base offset is at or above `base`.
///
/// Looking up the current base plus one therefore yields the successor
/// segment, whatever base the successor actually starts at.
pub(crate) fn find_segment_by_base_offset(
    segments: &[Arc<Segment>],
    base: Offset,
) -> Option<Arc<Segment>> {
    let idx = segments.partition_point(|s| s.base_offset() < base);
    segments.get(idx).map(Arc::clone)
}

/// Locates the watermark cursor: the index of the segment holding `hw`
/// and the byte position just past the end of the `hw` message.
fn hw_position(segments: &[Arc<Segment>], hw: Offset) -> LogResult<(usize, u64)> {
    let Some((segment, idx)) = find_segment(segments, hw) else {
        return Err(LogError::SegmentNotFound { offset: hw });
    };
    let entry = segment.find_entry(hw)?;
    Ok((idx, entry.position + u64::from(entry.size)))
}

/// A reader's position within one segment.
#[derive(Debug)]
struct SegmentPos {
    seg: Arc<Segment>,
    pos: u64,
}

/// Streams every byte appended to the log from a starting offset,
/// following writes across segment rolls and blocking at the write tail.
///
/// Created by [`CommitLog::new_uncommitted_reader`].
pub struct UncommittedReader {
    log: Arc<CommitLog>,
    cancel: CancelToken,
    waiter: WaiterId,
    state: Mutex<SegmentPos>,
}

impl UncommittedReader {
    /// Reads log bytes into `buf`, blocking at the write tail until more
    /// bytes arrive, the reader is cancelled, or the log closes.
    ///
    /// Returns the number of bytes copied. `Ok(0)` on a non-empty buffer
    /// means the stream ended; bytes accumulated before a control signal
    /// are returned by the same call that observed it.
    ///
    /// # Errors
    /// Propagates storage errors unchanged; the reader should not be
    /// reused after one.
    pub async fn read(&self, buf: &mut [u8]) -> LogResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let mut segments = self.log.segments();
        let mut n = 0;
        // Set after a wait; a wake without progress means the segment was
        // sealed bare and the reader must chase the successor instead of
        // re-parking on the same tail.
        let mut waiting = false;

        loop {
            let read = state.seg.read_at(&mut buf[n..], state.pos)?;
            n += read;
            state.pos += read as u64;
            if n == buf.len() {
                break;
            }
            if read != 0 {
                waiting = false;
                continue;
            }

            // At the tail of the current segment.
            if !waiting {
                if let Some(next) = find_segment_by_base_offset(&segments, state.seg.base_offset().next())
                {
                    trace!(base_offset = next.base_offset().get(), "rolling to successor");
                    state.seg = next;
                    state.pos = 0;
                    continue;
                }
                waiting = true;
                if !self.wait_for_data(&state.seg, state.pos).await {
                    return Ok(n);
                }
                continue;
            }

            // Woke without progress: the segment rolled out from under us.
            // Chase the successor in a fresh snapshot, parking as needed.
            segments = self.log.segments();
            loop {
                if let Some(next) = find_segment_by_base_offset(&segments, state.seg.base_offset().next())
                {
                    trace!(base_offset = next.base_offset().get(), "rolling to successor");
                    state.seg = next;
                    state.pos = 0;
                    break;
                }
                if !self.wait_for_data(&state.seg, state.pos).await {
                    return Ok(n);
                }
                segments = self.log.segments();
            }
        }

        Ok(n)
    }

    /// Parks at the segment tail. Returns false on cancellation or close;
    /// the waiter is deregistered on every exit path.
    async fn wait_for_data(&self, seg: &Arc<Segment>, pos: u64) -> bool {
        let handle = seg.wait_for_data(self.waiter, pos);
        trace!(base_offset = seg.base_offset().get(), pos, "parked at tail");
        tokio::select! {
            biased;
            () = self.log.closed() => {
                seg.remove_waiter(self.waiter);
                false
            }
            () = self.cancel.cancelled() => {
                seg.remove_waiter(self.waiter);
                false
            }
            _ = handle => true,
        }
    }
}

#[async_trait]
impl LogStream for UncommittedReader {
    async fn read(&self, buf: &mut [u8]) -> LogResult<usize> {
        Self::read(self, buf).await
    }
}

/// Cursor at the byte just past the end of the watermark message.
#[derive(Debug)]
struct HwCursor {
    seg: Arc<Segment>,
    pos: u64,
}

/// State of a [`CommittedReader`], serialized by its mutex.
#[derive(Debug)]
struct CommittedState {
    /// Current read position; `None` while parked ahead of the watermark.
    current: Option<SegmentPos>,
    /// Offset to start from once the watermark reaches it (meaningful
    /// only while `current` is `None`).
    resume_offset: Offset,
    /// Watermark value this reader has synced to.
    hw: Option<Offset>,
    /// Clamp for reads inside the watermark segment.
    hw_cursor: Option<HwCursor>,
}

/// Streams bytes at or below the log's high watermark, blocking at the
/// watermark until the replication layer advances it.
///
/// Created by [`CommitLog::new_committed_reader`]. Bytes for an offset are
/// only ever delivered after the reader has observed a watermark at or
/// above that offset; the watermark never retreats.
pub struct CommittedReader {
    log: Arc<CommitLog>,
    cancel: CancelToken,
    waiter: WaiterId,
    state: Mutex<CommittedState>,
}

impl CommittedReader {
    /// Reads committed log bytes into `buf`, blocking at the watermark
    /// until it advances, the reader is cancelled, or the log closes.
    ///
    /// Returns the number of bytes copied. `Ok(0)` on a non-empty buffer
    /// means the stream ended; bytes accumulated before a control signal
    /// are returned by the same call that observed it.
    ///
    /// # Errors
    /// `SegmentNotFound` if the resume offset was trimmed while the reader
    /// was parked; `NoNextSegment` if the segment list violates its
    /// invariant below the watermark; storage errors pass through.
    pub async fn read(&self, buf: &mut [u8]) -> LogResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let mut segments = self.log.segments();

        if state.current.is_none() {
            // Constructed ahead of the watermark (or the log was empty):
            // park until the watermark reaches the requested offset.
            let offset = state.resume_offset;
            let mut hw = self.log.high_watermark();
            while hw < Some(offset) {
                if !self.wait_for_hw(hw).await {
                    return Ok(0);
                }
                hw = self.log.high_watermark();
            }

            state.hw = hw;
            segments = self.log.segments();
            let committed = hw.expect("watermark reached the resume offset");
            let (idx, pos) = hw_position(&segments, committed)?;
            state.hw_cursor = Some(HwCursor {
                seg: Arc::clone(&segments[idx]),
                pos,
            });

            let Some((seg, _)) = find_segment(&segments, offset) else {
                return Err(LogError::SegmentNotFound { offset });
            };
            let entry = seg.find_entry(offset)?;
            state.current = Some(SegmentPos {
                seg,
                pos: entry.position,
            });
        }

        self.read_loop(&mut state, buf, segments).await
    }

    async fn read_loop(
        &self,
        state: &mut CommittedState,
        buf: &mut [u8],
        mut segments: Vec<Arc<Segment>>,
    ) -> LogResult<usize> {
        let mut n = 0;
        loop {
            let current = state.current.as_mut().expect("read loop needs a position");

            // Inside the watermark segment, never read past the cursor.
            let mut want = buf.len() - n;
            let mut at_hw = false;
            if let Some(cursor) = &state.hw_cursor {
                if Arc::ptr_eq(&current.seg, &cursor.seg) {
                    // Safe cast: positions are bounded by the store size.
                    #[allow(clippy::cast_possible_truncation)]
                    let below = (cursor.pos - current.pos) as usize;
                    want = want.min(below);
                    at_hw = below == 0;
                }
            }

            if !at_hw {
                let read = current.seg.read_at(&mut buf[n..n + want], current.pos)?;
                n += read;
                current.pos += read as u64;
                if n == buf.len() {
                    break;
                }
                if read != 0 {
                    continue;
                }

                // Tail of a segment strictly below the watermark: a
                // successor must exist.
                let base = current.seg.base_offset();
                let Some(next) = find_segment_by_base_offset(&segments, base.next()) else {
                    return Err(LogError::NoNextSegment { base_offset: base });
                };
                trace!(base_offset = next.base_offset().get(), "rolling to successor");
                current.seg = next;
                current.pos = 0;
                continue;
            }

            // Caught up to the watermark: block until it advances, then
            // resync the cursor against a fresh snapshot.
            let mut hw = self.log.high_watermark();
            while hw == state.hw {
                if !self.wait_for_hw(hw).await {
                    return Ok(n);
                }
                hw = self.log.high_watermark();
            }

            state.hw = hw;
            segments = self.log.segments();
            let committed = hw.expect("watermark only advances");
            let (idx, pos) = hw_position(&segments, committed)?;
            state.hw_cursor = Some(HwCursor {
                seg: Arc::clone(&segments[idx]),
                pos,
            });
        }

        Ok(n)
    }

    /// Parks on the watermark. Returns false on cancellation or close;
    /// the waiter is deregistered on every exit path.
    async fn wait_for_hw(&self, last_seen: Option<Offset>) -> bool {
        let handle = self.log.wait_for_hw(self.waiter, last_seen);
        trace!(hw = ?last_seen, "parked at watermark");
        tokio::select! {
            biased;
            () = self.log.closed() => {
                self.log.remove_hw_waiter(self.waiter);
                false
            }
            () = self.cancel.cancelled() => {
                self.log.remove_hw_waiter(self.waiter);
                false
            }
            _ = handle => true,
        }
    }
}

#[async_trait]
impl LogStream for CommittedReader {
    async fn read(&self, buf: &mut [u8]) -> LogResult<usize> {
        Self::read(self, buf).await
    }
}

impl CommitLog {
    /// Creates a reader that streams every appended byte starting at
    /// `offset`, committed or not.
    ///
    /// # Errors
    /// `SegmentNotFound` if no segment covers `offset` (it was trimmed by
    /// retention); `OffsetOutOfRange` if the covering segment has not
    /// assigned it yet.
    pub fn new_uncommitted_reader(
        self: &Arc<Self>,
        cancel: CancelToken,
        offset: Offset,
    ) -> LogResult<UncommittedReader> {
        let (segments, _hw) = self.reader_snapshot();
        let Some((seg, _)) = find_segment(&segments, offset) else {
            return Err(LogError::SegmentNotFound { offset });
        };
        let entry = seg.find_entry(offset)?;

        Ok(UncommittedReader {
            log: Arc::clone(self),
            cancel,
            waiter: WaiterId::allocate(),
            state: Mutex::new(SegmentPos {
                seg,
                pos: entry.position,
            }),
        })
    }

    /// Creates a reader that streams only committed bytes starting at
    /// `offset`.
    ///
    /// An `offset` above the current watermark - including the empty-log
    /// case - parks the reader until the watermark reaches it; the first
    /// bytes delivered are then those of `offset` itself. An `offset`
    /// below the oldest retained offset is silently clamped up to it.
    ///
    /// # Errors
    /// `SegmentNotFound` / `OffsetOutOfRange` if the watermark points at
    /// data the segment list no longer covers (storage invariant
    /// violation).
    pub fn new_committed_reader(
        self: &Arc<Self>,
        cancel: CancelToken,
        offset: Offset,
    ) -> LogResult<CommittedReader> {
        // Segments, watermark, and the oldest offset must come from one
        // instant; a concurrent retention trim may not split the clamp
        // from the segment lookup.
        let (segments, hw) = self.reader_snapshot();

        let mut hw_cursor = None;
        if let Some(committed) = hw {
            let (idx, pos) = hw_position(&segments, committed)?;
            hw_cursor = Some(HwCursor {
                seg: Arc::clone(&segments[idx]),
                pos,
            });
        }

        // Ahead of the watermark: start in the parked state.
        if Some(offset) > hw {
            return Ok(CommittedReader {
                log: Arc::clone(self),
                cancel,
                waiter: WaiterId::allocate(),
                state: Mutex::new(CommittedState {
                    current: None,
                    resume_offset: offset,
                    hw,
                    hw_cursor,
                }),
            });
        }

        let oldest = segments
            .first()
            .expect("segment list is never empty")
            .base_offset();
        let offset = offset.max(oldest);
        let Some((seg, _)) = find_segment(&segments, offset) else {
            return Err(LogError::SegmentNotFound { offset });
        };
        let entry = seg.find_entry(offset)?;

        Ok(CommittedReader {
            log: Arc::clone(self),
            cancel,
            waiter: WaiterId::allocate(),
            state: Mutex::new(CommittedState {
                current: Some(SegmentPos {
                    seg,
                    pos: entry.position,
                }),
                resume_offset: offset,
                hw,
                hw_cursor,
            }),
        })
    }
}
