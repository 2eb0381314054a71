//! Background task handles.
//!
//! Every loop the client runs (connect/retry, stop, heartbeat, delivery
//! tracking, message dispatch) is owned by a [`TaskHandle`]; dropping the
//! handle aborts the task. Loops hold only a weak reference to the client,
//! so a dropped client takes its loops with it.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

// ============================================================================
// TaskHandle
// ============================================================================

/// Owned background task, aborted on drop.
#[derive(Debug)]
pub(crate) struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    /// Spawns a future on `runtime`.
    pub(crate) fn spawn<F>(runtime: &Handle, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(runtime.spawn(future))
    }

    /// Spawns a loop calling `tick` every `period` until it breaks or the
    /// target is dropped.
    pub(crate) fn every<T, F>(runtime: &Handle, period: Duration, target: Weak<T>, mut tick: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnMut(&Arc<T>) -> ControlFlow<()> + Send + 'static,
    {
        Self::spawn(runtime, async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(target) = target.upgrade() else {
                    return;
                };
                if tick(&target).is_break() {
                    return;
                }
            }
        })
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ============================================================================
// Loops
// ============================================================================

/// Background tasks owned by one client.
#[derive(Debug, Default)]
pub(crate) struct Loops {
    /// Connect attempts and timed retries.
    pub connect: Option<TaskHandle>,
    /// Transport stop polling.
    pub stop: Option<TaskHandle>,
    /// Heartbeat `work` calls.
    pub heartbeat: Option<TaskHandle>,
    /// Outbound delivery tracking.
    pub tracker: Option<TaskHandle>,
    /// Inbound message dispatch.
    pub dispatch: Option<TaskHandle>,
}

impl Loops {
    /// Aborts the loops bound to the current connection.
    pub(crate) fn cancel_connection(&mut self) {
        self.heartbeat = None;
        self.tracker = None;
        self.dispatch = None;
    }

    /// Aborts everything except the stop task.
    pub(crate) fn cancel_all(&mut self) {
        self.connect = None;
        self.cancel_connection();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_every_stops_on_break() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TaskHandle::every(
            &Handle::current(),
            Duration::from_millis(1),
            Arc::downgrade(&count),
            |count| {
                if count.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        drop(handle);
    }

    #[tokio::test]
    async fn test_drop_aborts() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = TaskHandle::every(
            &Handle::current(),
            Duration::from_millis(1),
            Arc::downgrade(&count),
            |count| {
                count.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            },
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let after_drop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn test_loop_ends_when_target_dropped() {
        let target = Arc::new(AtomicUsize::new(0));
        let handle = TaskHandle::every(
            &Handle::current(),
            Duration::from_millis(1),
            Arc::downgrade(&target),
            |_| ControlFlow::Continue(()),
        );
        drop(target);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.0.is_finished());
    }
}
