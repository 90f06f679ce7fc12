//! One-shot cancellable timer tied to a single pending request.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle to a scheduled timeout. Dropping it cancels the timer.
pub struct TimeoutHandle {
    /// Sleeping task; `None` once cancelled or disarmed.
    task: Option<JoinHandle<()>>,
}

impl TimeoutHandle {
    /// Run `on_fire` on `runtime` once `after` has elapsed.
    pub fn schedule<F>(runtime: &Handle, after: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_fire();
        });
        Self { task: Some(task) }
    }

    /// Stop the timer from firing. Best effort: a timer already running its
    /// callback is not interrupted.
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            trace!("Cancelling discovery timer");
            task.abort();
        }
    }

    /// Release the handle without cancelling (used from the timer's own callback).
    pub fn disarm(mut self) {
        self.task.take();
    }

    /// Whether the timer task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = TimeoutHandle::schedule(&Handle::current(), Duration::from_secs(1), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fired.load(Ordering::SeqCst));
        timer.disarm();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = TimeoutHandle::schedule(&Handle::current(), Duration::from_secs(1), move || {
            flag.store(true, Ordering::SeqCst);
        });

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        drop(TimeoutHandle::schedule(
            &Handle::current(),
            Duration::from_millis(10),
            move || flag.store(true, Ordering::SeqCst),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
