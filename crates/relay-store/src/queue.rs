use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// The queue was closed by `release()`; blocked producers and consumers wake
/// with this instead of hanging on shutdown.
#[derive(Debug)]
pub(crate) struct QueueClosed;

/// Bounded FIFO used by every store variant. `put` suspends when full and
/// `take` suspends when empty; slot/item bookkeeping lives in a pair of
/// semaphores so a waiter can never miss a wakeup.
pub(crate) struct BoundedQueue<T> {
    capacity: usize,
    slots: Semaphore,
    items: Semaphore,
    inner: Mutex<VecDeque<T>>,
}

impl<T: Clone> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            capacity,
            slots: Semaphore::new(capacity),
            items: Semaphore::new(0),
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn put(&self, item: T) -> Result<(), QueueClosed> {
        let permit = self.slots.acquire().await.map_err(|_| QueueClosed)?;
        permit.forget();
        self.lock().push_back(item);
        self.items.add_permits(1);
        Ok(())
    }

    pub async fn take(&self) -> Result<T, QueueClosed> {
        let permit = self.items.acquire().await.map_err(|_| QueueClosed)?;
        permit.forget();
        let item = self
            .lock()
            .pop_front()
            .expect("item permit implies a queued element");
        self.slots.add_permits(1);
        Ok(item)
    }

    pub fn peek(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Closes the queue: blocked and future callers get `QueueClosed`.
    /// Contents are dropped with the queue itself.
    pub fn close(&self) {
        self.slots.close();
        self.items.close();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
