//! Listener-count gate for host events.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::trace;

/// Tracks how many host listeners are attached.
///
/// Before the first [`attach`](Self::attach) the gate has not been activated
/// and [`should_emit`](Self::should_emit) reports `true`, so hosts that never
/// register listeners still see log and disconnect events. Discovery batches
/// use the stricter [`has_subscribers`](Self::has_subscribers).
#[derive(Debug, Default)]
pub struct SubscriberGate {
    /// Attached listeners, never below zero.
    count: AtomicUsize,
    /// Set by the first attach.
    activated: AtomicBool,
}

impl SubscriberGate {
    /// Create an inactive gate with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one listener and activate tracking.
    pub fn attach(&self) -> usize {
        self.activated.store(true, Ordering::SeqCst);
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Listener attached ({} active)", count);
        count
    }

    /// Remove one listener. The count never drops below zero.
    pub fn detach(&self) -> usize {
        self.remove(1)
    }

    /// Remove `n` listeners at once, clamped at zero.
    pub fn remove(&self, n: usize) -> usize {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(c.saturating_sub(n))
            })
            .unwrap_or(0);
        let count = previous.saturating_sub(n);
        trace!("Listeners removed ({} active)", count);
        count
    }

    /// Current listener count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether any `attach` has ever happened.
    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    /// Whether at least one listener is attached right now.
    pub fn has_subscribers(&self) -> bool {
        self.count() > 0
    }

    /// Whether gated events should go out: always before activation,
    /// afterwards only while a listener is attached.
    pub fn should_emit(&self) -> bool {
        !self.is_activated() || self.has_subscribers()
    }
}
