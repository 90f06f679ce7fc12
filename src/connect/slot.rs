//! Single-assignment completion slot.
//!
//! A pending request can be finished by a discovery match, a connect
//! callback, a timer or a cancellation, possibly on different threads. The
//! slot lets all of them race: the first [`PendingRequestSlot::try_settle`]
//! wins and every later call is a no-op.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Write-once outcome cell guarded by an atomic flag.
pub struct PendingRequestSlot<T> {
    /// Flipped by the one winning settle call.
    settled: AtomicBool,
    /// Copy of the winning outcome.
    outcome: Mutex<Option<T>>,
    /// Wakes the owner's [`Settlement`].
    waiter: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T: Clone> PendingRequestSlot<T> {
    /// Create an open slot and the future its owner awaits.
    pub fn new() -> (Arc<Self>, Settlement<T>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            settled: AtomicBool::new(false),
            outcome: Mutex::new(None),
            waiter: Mutex::new(Some(tx)),
        });
        (slot, Settlement { rx })
    }

    /// Record `outcome` if the slot is still open.
    ///
    /// Returns `true` only for the call that closed the slot.
    pub fn try_settle(&self, outcome: T) -> bool {
        if self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *self.outcome.lock() = Some(outcome.clone());
        if let Some(tx) = self.waiter.lock().take() {
            // The owner may have stopped waiting; the outcome is still recorded.
            let _ = tx.send(outcome);
        }
        true
    }

    /// Whether some call has already settled the slot.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// The recorded outcome, once the winning call has stored it.
    pub fn outcome(&self) -> Option<T> {
        self.outcome.lock().clone()
    }
}

/// Resolves with the winning outcome of a [`PendingRequestSlot`].
///
/// Yields `None` if the slot was dropped without being settled.
#[must_use = "a settlement does nothing unless awaited"]
pub struct Settlement<T> {
    /// Receives the winning outcome.
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Settlement<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|r| r.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (slot, settlement) = PendingRequestSlot::new();

        assert!(!slot.is_settled());
        assert!(slot.try_settle("match"));
        assert!(!slot.try_settle("timeout"));
        assert!(slot.is_settled());

        assert_eq!(settlement.await, Some("match"));
        assert_eq!(slot.outcome(), Some("match"));
    }

    #[test]
    fn test_settlement_pending_until_settled() {
        let (slot, settlement) = PendingRequestSlot::new();
        let mut settlement = tokio_test::task::spawn(settlement);

        tokio_test::assert_pending!(settlement.poll());
        assert!(slot.try_settle(3));
        assert!(settlement.is_woken());
        tokio_test::assert_ready_eq!(settlement.poll(), Some(3));
    }

    #[tokio::test]
    async fn test_dropped_slot_resolves_none() {
        let (slot, settlement) = PendingRequestSlot::<u32>::new();
        drop(slot);
        assert_eq!(settlement.await, None);
    }

    #[test]
    fn test_settle_without_waiter() {
        let (slot, settlement) = PendingRequestSlot::new();
        drop(settlement);
        assert!(slot.try_settle(7));
        assert_eq!(slot.outcome(), Some(7));
    }

    #[test]
    fn test_concurrent_settlement_exactly_once() {
        const THREADS: usize = 8;

        for _ in 0..200 {
            let (slot, settlement) = PendingRequestSlot::new();
            let barrier = Arc::new(Barrier::new(THREADS));
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let slot = slot.clone();
                    let barrier = barrier.clone();
                    let wins = wins.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        if slot.try_settle(i) {
                            wins.fetch_add(1, Ordering::SeqCst);
                            Some(i)
                        } else {
                            None
                        }
                    })
                })
                .collect();

            let winners: Vec<usize> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();

            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert_eq!(winners.len(), 1);
            assert_eq!(slot.outcome(), Some(winners[0]));
            assert_eq!(futures::executor::block_on(settlement), Some(winners[0]));
        }
    }
}
