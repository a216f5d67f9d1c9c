//! Cross-task reader scenarios: parking, wakeup, cancellation, close,
//! segment rolls, and watermark clamping.
//!
//! Basic per-module behavior is tested inside the crate; these tests
//! exercise readers and writers on separate tasks.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::timeout;

use brook_commitlog::{
    read_message, Cancellation, CommitLog, LogConfig, LogError, LogStream, SegmentConfig,
};
use brook_core::{Message, Offset, Timestamp, MESSAGE_HEADER_SIZE};

const WAIT: Duration = Duration::from_secs(5);
const PARKED: Duration = Duration::from_millis(100);

fn log_with_segment_messages(max_messages: u64) -> Arc<CommitLog> {
    let config =
        LogConfig::new().with_segment_config(SegmentConfig::new().with_max_messages(max_messages));
    Arc::new(CommitLog::new(config))
}

fn ts(i: u64) -> Timestamp {
    Timestamp::from_millis(1_000 + i)
}

/// Expected frame bytes for one message.
fn frame(offset: u64, payload: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    Message::new(
        Offset::new(offset),
        ts(offset),
        Bytes::from(payload.to_string()),
    )
    .encode(&mut buf);
    buf
}

fn framed_len(payload: &str) -> usize {
    MESSAGE_HEADER_SIZE + payload.len()
}

/// Appends `payloads` starting at the log's tail, with deterministic
/// timestamps, returning the expected byte stream.
fn append_all(log: &CommitLog, payloads: &[&str]) -> BytesMut {
    let mut expected = BytesMut::new();
    for payload in payloads {
        let offset = log
            .append_with_timestamp(payload.to_string(), ts(log.next_offset().get()))
            .unwrap();
        expected.extend_from_slice(&frame(offset.get(), payload));
    }
    expected
}

/// Reads exactly `len` bytes, failing the test if the stream ends early.
async fn read_exact(reader: &impl LogStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = timeout(WAIT, reader.read(&mut buf[filled..]))
            .await
            .expect("read timed out")
            .expect("read failed");
        assert!(n > 0, "stream ended after {filled} of {len} bytes");
        filled += n;
    }
    buf
}

/// Decodes a byte stream into messages.
fn decode_all(data: &[u8]) -> Vec<Message> {
    let mut bytes = Bytes::copy_from_slice(data);
    let mut messages = Vec::new();
    while !bytes.is_empty() {
        messages.push(Message::decode(&mut bytes).expect("complete frame"));
    }
    messages
}

/// Polls `cond` until it holds, with a timeout.
async fn wait_until(cond: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn committed_reader_streams_all_committed_records() {
    let log = log_with_segment_messages(1_000);
    let expected = append_all(&log, &["a", "bb", "ccc"]);
    log.set_high_watermark(Offset::new(2));

    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let data = read_exact(&reader, expected.len()).await;
    assert_eq!(data, expected.as_ref());

    let messages = decode_all(&data);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].offset, Offset::new(0));
    assert_eq!(messages[0].payload, Bytes::from("a"));
    assert_eq!(messages[1].offset, Offset::new(1));
    assert_eq!(messages[1].payload, Bytes::from("bb"));
    assert_eq!(messages[2].offset, Offset::new(2));
    assert_eq!(messages[2].payload, Bytes::from("ccc"));
}

#[tokio::test]
async fn committed_reader_wakes_when_first_record_commits() {
    let log = log_with_segment_messages(1_000);
    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; framed_len("x")];
        let n = reader.read(&mut buf).await.unwrap();
        (n, buf, reader)
    });

    {
        let log = Arc::clone(&log);
        wait_until(move || log.hw_waiter_count() == 1).await;
    }

    log.append_with_timestamp("x", ts(0)).unwrap();
    log.set_high_watermark(Offset::new(0));

    let (n, buf, reader) = timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(n, framed_len("x"));
    let messages = decode_all(&buf);
    assert_eq!(messages[0].offset, Offset::new(0));
    assert_eq!(messages[0].payload, Bytes::from("x"));

    // Exactly one record was committed; the reader parks again.
    let mut buf = vec![0u8; MESSAGE_HEADER_SIZE];
    assert!(timeout(PARKED, reader.read(&mut buf)).await.is_err());
}

#[tokio::test]
async fn committed_reader_starts_mid_log_across_segments() {
    let log = log_with_segment_messages(3);
    let payloads = ["m0", "m1", "m2", "m3", "m4", "m5"];
    let expected = append_all(&log, &payloads);
    log.set_high_watermark(Offset::new(5));
    assert_eq!(log.segments().len(), 2);

    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(1))
        .unwrap();

    // Everything from offset 1 through the watermark, in order.
    let skip = framed_len("m0");
    let data = read_exact(&reader, expected.len() - skip).await;
    assert_eq!(data, &expected[skip..]);

    let messages = decode_all(&data);
    let offsets: Vec<u64> = messages.iter().map(|m| m.offset.get()).collect();
    assert_eq!(offsets, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn cancelled_uncommitted_reader_returns_partial_then_zero() {
    let log = log_with_segment_messages(1_000);
    let expected = append_all(&log, &["a", "b"]);

    let cancel = Cancellation::new();
    let reader = log
        .new_uncommitted_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        let n = reader.read(&mut buf).await.unwrap();
        (n, buf, reader)
    });

    let tail = log.segments().last().unwrap().clone();
    {
        let tail = Arc::clone(&tail);
        wait_until(move || tail.waiter_count() == 1).await;
    }

    cancel.cancel();

    let (n, buf, reader) = timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(n, expected.len());
    assert_eq!(&buf[..n], expected.as_ref());
    assert_eq!(tail.waiter_count(), 0);

    // Cancellation is sticky: the stream has ended.
    let mut buf = vec![0u8; 64];
    assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_committed_readers_see_identical_streams() {
    let log = log_with_segment_messages(2);
    let payloads = ["r0", "r1", "r2", "r3", "r4"];
    let total: usize = payloads.iter().map(|p| framed_len(p)).sum();

    let cancel = Cancellation::new();
    let first = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let second = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let first_task = tokio::spawn(async move { read_exact(&first, total).await });
    let second_task = tokio::spawn(async move { read_exact(&second, total).await });

    // Commit one record at a time while both readers drain.
    let writer_log = Arc::clone(&log);
    let expected = tokio::task::spawn_blocking(move || {
        let mut expected = BytesMut::new();
        for (i, payload) in payloads.iter().enumerate() {
            let offset = writer_log
                .append_with_timestamp(payload.to_string(), ts(i as u64))
                .unwrap();
            writer_log.set_high_watermark(offset);
            expected.extend_from_slice(&frame(offset.get(), payload));
            std::thread::sleep(Duration::from_millis(1));
        }
        expected
    })
    .await
    .unwrap();

    let first_data = timeout(WAIT, first_task).await.unwrap().unwrap();
    let second_data = timeout(WAIT, second_task).await.unwrap().unwrap();

    assert_eq!(first_data, expected.as_ref());
    assert_eq!(second_data, expected.as_ref());
}

#[tokio::test]
async fn committed_reader_ahead_of_watermark_delivers_requested_offset() {
    let log = log_with_segment_messages(1_000);
    for i in 0..=10u64 {
        log.append_with_timestamp(format!("r{i}"), ts(i)).unwrap();
    }
    log.set_high_watermark(Offset::new(10));

    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(100))
        .unwrap();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; framed_len("r100")];
        let n = reader.read(&mut buf).await.unwrap();
        (n, buf)
    });

    {
        let log = Arc::clone(&log);
        wait_until(move || log.hw_waiter_count() == 1).await;
    }

    for i in 11..=100u64 {
        log.append_with_timestamp(format!("r{i}"), ts(i)).unwrap();
    }
    log.set_high_watermark(Offset::new(100));

    let (n, buf) = timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(n, framed_len("r100"));

    // The first record delivered is the requested one, not an earlier
    // offset the watermark passed through.
    let messages = decode_all(&buf);
    assert_eq!(messages[0].offset, Offset::new(100));
    assert_eq!(messages[0].payload, Bytes::from("r100"));
}

#[tokio::test]
async fn uncommitted_reader_rolls_at_sealed_segment_boundary() {
    let log = log_with_segment_messages(2);
    let expected = append_all(&log, &["a", "b", "c"]);
    assert_eq!(log.segments().len(), 2);
    assert!(log.segments()[0].is_sealed());

    // From the start: crosses the sealed boundary without parking.
    let cancel = Cancellation::new();
    let reader = log
        .new_uncommitted_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let data = read_exact(&reader, expected.len()).await;
    assert_eq!(data, expected.as_ref());

    // From the successor's base: no spurious wait either.
    let reader = log
        .new_uncommitted_reader(cancel.token(), Offset::new(2))
        .unwrap();
    let data = read_exact(&reader, framed_len("c")).await;
    let messages = decode_all(&data);
    assert_eq!(messages[0].offset, Offset::new(2));
}

#[tokio::test]
async fn committed_reader_crosses_roll_with_watermark_in_successor() {
    let log = log_with_segment_messages(2);
    let expected = append_all(&log, &["a", "b", "c"]);
    log.set_high_watermark(Offset::new(2));

    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let data = read_exact(&reader, expected.len()).await;
    assert_eq!(data, expected.as_ref());
}

#[tokio::test]
async fn incremental_watermark_advance_matches_bulk() {
    let payloads = ["p0", "p1", "p2", "p3"];

    // Bulk: commit everything, then read.
    let bulk_log = log_with_segment_messages(2);
    let expected = append_all(&bulk_log, &payloads);
    bulk_log.set_high_watermark(Offset::new(3));
    let cancel = Cancellation::new();
    let reader = bulk_log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let bulk_data = read_exact(&reader, expected.len()).await;

    // Incremental: advance the watermark one record at a time under a
    // draining reader.
    let step_log = log_with_segment_messages(2);
    append_all(&step_log, &payloads);
    let reader = step_log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let total = expected.len();
    let task = tokio::spawn(async move { read_exact(&reader, total).await });
    for i in 0..payloads.len() as u64 {
        step_log.set_high_watermark(Offset::new(i));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let step_data = timeout(WAIT, task).await.unwrap().unwrap();

    assert_eq!(bulk_data, step_data);
    assert_eq!(step_data, expected.as_ref());
}

#[tokio::test]
async fn closing_log_wakes_all_parked_readers() {
    let log = log_with_segment_messages(1_000);
    append_all(&log, &["a"]);

    let cancel = Cancellation::new();
    let uncommitted = log
        .new_uncommitted_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let committed = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let uncommitted_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        uncommitted.read(&mut buf).await.unwrap()
    });
    let committed_task = tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        committed.read(&mut buf).await.unwrap()
    });

    let tail = log.segments().last().unwrap().clone();
    {
        let (tail, log) = (Arc::clone(&tail), Arc::clone(&log));
        wait_until(move || tail.waiter_count() == 1 && log.hw_waiter_count() == 1).await;
    }

    log.close();

    // The uncommitted reader drained the appended record before parking;
    // the committed reader saw nothing below the (never set) watermark.
    let n = timeout(WAIT, uncommitted_task).await.unwrap().unwrap();
    assert_eq!(n, framed_len("a"));
    let n = timeout(WAIT, committed_task).await.unwrap().unwrap();
    assert_eq!(n, 0);

    assert_eq!(tail.waiter_count(), 0);
    assert_eq!(log.hw_waiter_count(), 0);
}

#[tokio::test]
async fn round_trip_reproduces_every_record() {
    let log = log_with_segment_messages(3);
    let payloads: Vec<String> = (0..10).map(|i| format!("record-{i}")).collect();
    let mut expected = BytesMut::new();
    for (i, payload) in payloads.iter().enumerate() {
        log.append_with_timestamp(payload.clone(), ts(i as u64))
            .unwrap();
        expected.extend_from_slice(&frame(i as u64, payload));
    }

    // The raw byte stream is the exact concatenation of the frames.
    let cancel = Cancellation::new();
    let reader = log
        .new_uncommitted_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let data = read_exact(&reader, expected.len()).await;
    assert_eq!(data, expected.as_ref());

    // Decoding a fresh reader's stream reproduces each record.
    let reader = log
        .new_uncommitted_reader(cancel.token(), Offset::new(0))
        .unwrap();
    let mut headers = [0u8; MESSAGE_HEADER_SIZE];
    for (i, payload) in payloads.iter().enumerate() {
        let message = timeout(WAIT, read_message(&reader, &mut headers))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.offset, Offset::new(i as u64));
        assert_eq!(message.timestamp, ts(i as u64));
        assert_eq!(message.payload, Bytes::from(payload.clone()));
    }
}

#[tokio::test]
async fn committed_reader_clamps_below_oldest_offset() {
    let config = LogConfig::new()
        .with_segment_config(SegmentConfig::new().with_max_messages(2))
        .with_max_segments(2);
    let log = Arc::new(CommitLog::new(config));
    let payloads = ["t0", "t1", "t2", "t3", "t4", "t5"];
    append_all(&log, &payloads);
    log.set_high_watermark(Offset::new(5));
    assert_eq!(log.oldest_offset(), Offset::new(2));

    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let total: usize = payloads[2..].iter().map(|p| framed_len(p)).sum();
    let data = read_exact(&reader, total).await;
    let messages = decode_all(&data);
    let offsets: Vec<u64> = messages.iter().map(|m| m.offset.get()).collect();
    assert_eq!(offsets, vec![2, 3, 4, 5]);
}

#[tokio::test]
async fn committed_reader_never_passes_the_watermark() {
    let log = log_with_segment_messages(1_000);
    append_all(&log, &["a", "b", "c"]);
    log.set_high_watermark(Offset::new(0));

    let cancel = Cancellation::new();
    let reader = log
        .new_committed_reader(cancel.token(), Offset::new(0))
        .unwrap();

    // Only the committed record comes out, though more bytes are written.
    let data = read_exact(&reader, framed_len("a")).await;
    assert_eq!(decode_all(&data)[0].offset, Offset::new(0));

    let mut buf = vec![0u8; MESSAGE_HEADER_SIZE];
    assert!(timeout(PARKED, reader.read(&mut buf)).await.is_err());

    // Advancing the watermark releases the next record.
    log.set_high_watermark(Offset::new(1));
    let data = read_exact(&reader, framed_len("b")).await;
    assert_eq!(decode_all(&data)[0].offset, Offset::new(1));
}

#[tokio::test]
async fn uncommitted_reader_follows_live_appends() {
    let log = log_with_segment_messages(1_000);
    let expected_first = append_all(&log, &["one"]);

    let cancel = Cancellation::new();
    let reader = log
        .new_uncommitted_reader(cancel.token(), Offset::new(0))
        .unwrap();

    let total = expected_first.len() + framed_len("two");
    let task = tokio::spawn(async move { read_exact(&reader, total).await });

    let tail = log.segments().last().unwrap().clone();
    {
        let tail = Arc::clone(&tail);
        wait_until(move || tail.waiter_count() == 1).await;
    }

    let expected_second = append_all(&log, &["two"]);

    let data = timeout(WAIT, task).await.unwrap().unwrap();
    let mut expected = expected_first;
    expected.extend_from_slice(&expected_second);
    assert_eq!(data, expected.as_ref());
}

#[tokio::test]
async fn append_after_close_is_rejected() {
    let log = log_with_segment_messages(1_000);
    append_all(&log, &["a"]);
    log.close();

    assert!(matches!(log.append("b"), Err(LogError::Closed)));
}
