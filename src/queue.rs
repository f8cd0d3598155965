//! # Posting Queue
//!
//! A bounded, double-ended FIFO of `PostAction`s with an auxiliary atomic
//! counter of enqueued events. Plain `tokio::sync::mpsc` cannot push back to
//! the front on retry, so the queue is a `VecDeque` guarded by an async
//! mutex and a `Notify`, matching the "push back to head" requirement.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::entity::PostAction;

struct Inner {
    actions: Mutex<VecDeque<PostAction>>,
    notify: Notify,
    event_size: AtomicUsize,
    capacity: usize,
}

/// Handle to the posting queue, cheaply cloneable.
#[derive(Clone)]
pub struct PostingQueue {
    inner: Arc<Inner>,
}

impl PostingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                actions: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                event_size: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Current value of the auxiliary event-size counter. Equals the sum of
    /// `action.size()` over the queue at every quiescent observation.
    pub fn event_size(&self) -> usize {
        self.inner.event_size.load(Ordering::SeqCst)
    }

    /// Push an action to the tail of the queue (normal enqueue path).
    pub async fn push_back(&self, action: PostAction) {
        let size = action.size();
        let mut guard = self.inner.actions.lock().await;
        guard.push_back(action);
        self.inner.event_size.fetch_add(size, Ordering::SeqCst);
        drop(guard);
        self.inner.notify.notify_one();
    }

    /// Push an action back to the front of the queue: the retry path.
    /// Preserves per-entity order relative to still-queued entities.
    pub async fn push_front(&self, action: PostAction) {
        let size = action.size();
        let mut guard = self.inner.actions.lock().await;
        guard.push_front(action);
        self.inner.event_size.fetch_add(size, Ordering::SeqCst);
        drop(guard);
        self.inner.notify.notify_one();
    }

    /// Blocking take from the head of the queue: the steady-state worker's
    /// `postingQueue.take()`.
    pub async fn take(&self) -> PostAction {
        loop {
            {
                let mut guard = self.inner.actions.lock().await;
                if let Some(action) = guard.pop_front() {
                    self.inner.event_size.fetch_sub(action.size(), Ordering::SeqCst);
                    return action;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Non-blocking pop used by the shutdown-phase poller, which must
    /// respect a deadline rather than waiting forever.
    pub async fn try_take(&self) -> Option<PostAction> {
        let mut guard = self.inner.actions.lock().await;
        let action = guard.pop_front();
        if let Some(ref a) = action {
            self.inner.event_size.fetch_sub(a.size(), Ordering::SeqCst);
        }
        action
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.actions.lock().await.len()
    }
}
