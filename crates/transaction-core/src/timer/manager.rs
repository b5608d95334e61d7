//! Timer scheduling and cancellation.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Schedules one-shot timers that deliver an event value on expiry.
///
/// The manager is generic over the event type so the same service can carry
/// transaction timers and higher-level timers (e.g. registration refreshes)
/// without knowing anything about either. Cloning a manager is cheap; all
/// clones feed the same channel.
pub struct TimerManager<E> {
    tx: mpsc::Sender<E>,
}

impl<E: Send + 'static> TimerManager<E> {
    /// Create a manager that delivers expired timers on `tx`.
    pub fn new(tx: mpsc::Sender<E>) -> Self {
        Self { tx }
    }

    /// Convenience constructor: create the delivery channel alongside the
    /// manager.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Arm a one-shot timer.
    ///
    /// After `delay` the `event` value is sent on the manager's channel.
    /// Dropping the returned handle does not disarm the timer; call
    /// [`TimerHandle::cancel`] to do that.
    pub fn schedule(&self, delay: Duration, event: E) -> TimerHandle {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver may legitimately be gone during shutdown.
            let _ = tx.send(event).await;
        });
        trace!(?delay, "timer armed");
        TimerHandle { task }
    }
}

impl<E> Clone for TimerManager<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E> fmt::Debug for TimerManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerManager").finish_non_exhaustive()
    }
}

/// Handle to a pending timer, cancellable exactly once.
///
/// `cancel` consumes the handle, so a timer cannot be cancelled twice.
/// Cancelling a timer that has already fired is a no-op.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Disarm the timer. If it has already fired this does nothing.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Whether the timer has already fired (or been cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
