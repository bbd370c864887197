use ldm7_types::ProdIndex;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Notify;

/// Bounded-only-by-memory FIFO of [`ProdIndex`] (C1), shared between
/// whichever tasks discover missed products and the one task that drains
/// them into recovery requests.
///
/// `peek`/`remove` are split so a caller can inspect the head without
/// committing to handling it (used by the recovery-order check in
/// `§4.6.4`); the queue does not itself prevent two callers from racing a
/// `remove_nowait`, callers that need single-consumer semantics must
/// serialize their own peek/remove pairs.
#[derive(Clone)]
pub struct ProdIndexQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    items: VecDeque<ProdIndex>,
    shut_down: bool,
    cancelled: bool,
}

/// Returned by [`ProdIndexQueue::add`] once the queue has been permanently
/// [`cancel`](ProdIndexQueue::cancel)led.
#[derive(Debug, thiserror::Error)]
#[error("product-index queue was cancelled")]
pub struct Cancelled;

impl Default for ProdIndexQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProdIndexQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    shut_down: false,
                    cancelled: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue `i`. Fails only once the queue has been `cancel`led.
    pub fn add(&self, i: ProdIndex) -> Result<(), Cancelled> {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return Err(Cancelled);
        }
        state.items.push_back(i);
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Block until an element is available, or return `None` once the
    /// queue is shut down (or cancelled) with nothing left to drain.
    pub async fn peek_wait(&self) -> Option<ProdIndex> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let state = self.inner.state.lock();
                if let Some(i) = state.items.front().copied() {
                    return Some(i);
                }
                if state.cancelled || state.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn peek_nowait(&self) -> Option<ProdIndex> {
        self.inner.state.lock().items.front().copied()
    }

    pub fn remove_nowait(&self) -> Option<ProdIndex> {
        self.inner.state.lock().items.pop_front()
    }

    pub fn clear(&self) {
        self.inner.state.lock().items.clear();
    }

    pub fn count(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Snapshot of the current contents, head first. Used when persisting
    /// the combined requested+missed list on session close (I3).
    pub fn snapshot(&self) -> Vec<ProdIndex> {
        self.inner.state.lock().items.iter().copied().collect()
    }

    /// Wake every waiter; subsequent `peek_wait` calls return `None` once
    /// drained. `add` keeps working after shutdown.
    pub fn shutdown(&self) {
        self.inner.state.lock().shut_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Permanent: after this, `add` fails and `peek_wait` returns `None`.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.cancelled = true;
        state.items.clear();
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_strict_fifo() {
        let q = ProdIndexQueue::new();
        q.add(ProdIndex(1)).unwrap();
        q.add(ProdIndex(2)).unwrap();
        q.add(ProdIndex(3)).unwrap();
        assert_eq!(q.remove_nowait(), Some(ProdIndex(1)));
        assert_eq!(q.remove_nowait(), Some(ProdIndex(2)));
        assert_eq!(q.remove_nowait(), Some(ProdIndex(3)));
        assert_eq!(q.remove_nowait(), None);
    }

    #[tokio::test]
    async fn peek_wait_returns_none_after_shutdown_with_nothing_left() {
        let q = ProdIndexQueue::new();
        q.shutdown();
        assert_eq!(q.peek_wait().await, None);
    }

    #[tokio::test]
    async fn peek_wait_wakes_up_on_add() {
        let q = ProdIndexQueue::new();
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.peek_wait().await });
        tokio::task::yield_now().await;
        q.add(ProdIndex(42)).unwrap();
        assert_eq!(handle.await.unwrap(), Some(ProdIndex(42)));
    }

    #[test]
    fn cancel_is_permanent() {
        let q = ProdIndexQueue::new();
        q.add(ProdIndex(1)).unwrap();
        q.cancel();
        assert_eq!(q.count(), 0);
        assert!(q.add(ProdIndex(2)).is_err());
    }
}
