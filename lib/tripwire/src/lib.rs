//! Cooperative cancellation for long running discovery loops.
//!
//! A [`Trigger`] is held by whoever owns the lifetime of a task, the task
//! itself holds one or more [`Tripwire`]s. A tripwire is a future which
//! resolves once the trigger is cancelled or dropped, so it can be raced
//! against any other future with `tokio::select!`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

#[derive(Default)]
struct Shared {
    /// Set by `Trigger::cancel`
    cancelled: AtomicBool,
    /// Set by `Trigger::cancel` and when the trigger is dropped
    closed: AtomicBool,

    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        self.wakers
            .lock()
            .drain()
            .for_each(|(_id, waker)| waker.wake());
    }
}

/// The owning half, fire it with [`Trigger::cancel`].
pub struct Trigger {
    shared: Arc<Shared>,
}

impl Trigger {
    /// Cancel all associated tripwires, make them resolve immediately.
    pub fn cancel(self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        // `Drop` wakes up all pending tripwires
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// The observing half, resolves once the [`Trigger`] is cancelled or dropped.
pub struct Tripwire {
    shared: Arc<Shared>,
    id: u64,
}

impl Tripwire {
    pub fn new() -> (Trigger, Tripwire) {
        let shared = Arc::new(Shared::default());
        let id = shared.next_id();

        (
            Trigger {
                shared: Arc::clone(&shared),
            },
            Tripwire { shared, id },
        )
    }

    /// Returns true if the trigger was cancelled explicitly.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true if the trigger was cancelled or dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_id();

        Tripwire { shared, id }
    }
}

impl Drop for Tripwire {
    fn drop(&mut self) {
        self.shared.wakers.lock().remove(&self.id);
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_closed() {
            return Poll::Ready(());
        }

        self.shared
            .wakers
            .lock()
            .insert(self.id, cx.waker().clone());

        // the trigger might be fired between the check above and registering
        // the waker, check again so the wakeup is not lost.
        if self.is_closed() {
            self.shared.wakers.lock().remove(&self.id);
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    macro_rules! assert_pending {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_pending());
        };
    }

    macro_rules! assert_ready {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_ready());
        };
    }

    #[tokio::test]
    async fn cancel_resolves() {
        let (trigger, mut tripwire) = Tripwire::new();
        assert_pending!(tripwire);
        assert!(!tripwire.is_cancelled());

        trigger.cancel();

        assert_ready!(tripwire);
        assert_ready!(tripwire);
        assert!(tripwire.is_cancelled());
        assert!(tripwire.is_closed());
    }

    #[tokio::test]
    async fn drop_resolves_but_not_cancelled() {
        let (trigger, mut tripwire) = Tripwire::new();
        assert_pending!(tripwire);

        drop(trigger);

        assert_ready!(tripwire);
        assert!(tripwire.is_closed());
        assert!(!tripwire.is_cancelled());
    }

    #[tokio::test]
    async fn cloned_tripwires() {
        let (trigger, mut first) = Tripwire::new();
        let mut second = first.clone();
        assert_pending!(first);
        assert_pending!(second);
        assert_eq!(first.shared.wakers.lock().len(), 2);

        trigger.cancel();

        assert!(first.shared.wakers.lock().is_empty());
        assert_ready!(first);
        assert_ready!(second);
    }

    #[tokio::test]
    async fn dropped_tripwire_deregisters_waker() {
        let (_trigger, mut first) = Tripwire::new();
        let mut second = first.clone();
        assert_pending!(first);
        assert_pending!(second);

        drop(second);

        assert_eq!(first.shared.wakers.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn take_until_cancel() {
        let (trigger, tripwire) = Tripwire::new();

        let (tx, rx) = tokio::sync::mpsc::channel::<i32>(1);
        let mut stream = ReceiverStream::new(rx).take_until(tripwire);

        tx.send(1).await.unwrap();
        assert_eq!(stream.next().await, Some(1));

        trigger.cancel();
        assert!(tx.send(2).await.is_ok());
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn select_with_sleep() {
        let (trigger, tripwire) = Tripwire::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), tripwire).await;
        assert!(result.is_ok());
    }
}
