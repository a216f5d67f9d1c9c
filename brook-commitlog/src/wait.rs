//! Wait/notify glue for readers parked at the log's edges.
//!
//! Readers suspend in exactly two places: at a segment's write tail and at
//! the log's high watermark. Both follow the same discipline: the final
//! check of the observed quantity and the waiter registration happen under
//! the collaborator's lock, and writers update the quantity under that
//! same lock before firing - so a racing update is either visible to the
//! check or fires the registered waiter. No lost wakeups.
//!
//! Every wait races its notification handle against the log's `closed`
//! broadcast and the reader's cancellation token; the waiter is
//! deregistered on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{oneshot, watch};

/// Process-unique identity for a parked reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(u64);

impl WaiterId {
    /// Allocates a fresh waiter id.
    pub(crate) fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One-shot notification handle returned by a wait registration.
pub(crate) type WaitHandle = oneshot::Receiver<()>;

/// Returns a handle that is already signaled.
///
/// Used when the observed quantity changed before the waiter parked.
pub(crate) fn fired() -> WaitHandle {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(());
    rx
}

/// Readers parked on a collaborator, each holding a one-shot wakeup slot.
#[derive(Debug, Default)]
pub(crate) struct WaiterSet {
    waiters: HashMap<WaiterId, oneshot::Sender<()>>,
}

impl WaiterSet {
    /// Registers `waiter` and returns the handle its wakeup arrives on.
    ///
    /// Re-registering an id replaces the previous slot.
    pub(crate) fn register(&mut self, waiter: WaiterId) -> WaitHandle {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(waiter, tx);
        rx
    }

    /// Wakes and removes every parked waiter.
    pub(crate) fn notify_all(&mut self) {
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(());
        }
    }

    /// Deregisters `waiter`. Idempotent.
    pub(crate) fn remove(&mut self, waiter: WaiterId) {
        self.waiters.remove(&waiter);
    }

    /// Returns the number of parked waiters.
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

/// Owner half of a cancellation signal for blocking reads.
///
/// Calling [`cancel`](Self::cancel) - or dropping the `Cancellation` -
/// trips every [`CancelToken`] obtained from it.
#[derive(Debug)]
pub struct Cancellation {
    tx: watch::Sender<bool>,
}

impl Cancellation {
    /// Creates a new, untripped cancellation signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a token observing this signal.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Trips the signal, promptly waking every parked reader bound to it.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-side cancellation token handed to reader constructors.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolves once the signal has been tripped.
    ///
    /// Resolves immediately if cancellation already happened or the owning
    /// [`Cancellation`] was dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // A closed channel means the owner is gone; treat it as tripped.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Returns true if the signal has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_all_wakes_registered_waiters() {
        let mut set = WaiterSet::default();
        let a = set.register(WaiterId::allocate());
        let b = set.register(WaiterId::allocate());
        assert_eq!(set.len(), 2);

        set.notify_all();
        assert_eq!(set.len(), 0);
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut set = WaiterSet::default();
        let id = WaiterId::allocate();
        let _handle = set.register(id);

        set.remove(id);
        set.remove(id);
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn test_fired_handle_resolves_immediately() {
        assert!(fired().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_trips_tokens() {
        let cancel = Cancellation::new();
        let token = cancel.token();
        assert!(!token.is_cancelled());

        cancel.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_dropped_owner_counts_as_cancelled() {
        let cancel = Cancellation::new();
        let token = cancel.token();
        drop(cancel);

        assert!(token.is_cancelled());
        token.cancelled().await;
    }
}
