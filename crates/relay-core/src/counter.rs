use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Monotonic sequence-number marker with blocking wait-for-threshold
/// semantics. Mutations and waits are atomic with respect to each other:
/// waiters re-evaluate their predicate against the current value on
/// subscription and after every mutation, so a wakeup can never be missed.
///
/// Cheap to clone; clones share the same counter.
#[derive(Debug, Clone)]
pub struct SeqnoCounter {
    tx: Arc<watch::Sender<i64>>,
}

impl SeqnoCounter {
    pub fn new(initial: i64) -> Self {
        let (tx, _rx) = watch::channel(initial);
        SeqnoCounter { tx: Arc::new(tx) }
    }

    pub fn seqno(&self) -> i64 {
        *self.tx.borrow()
    }

    /// Sets the value. The value can only be set upward; a lower value is
    /// ignored.
    pub fn set_seqno(&self, seqno: i64) {
        self.tx.send_if_modified(|current| {
            if *current < seqno {
                *current = seqno;
                true
            } else {
                false
            }
        });
    }

    /// Increments, notifies waiters, and returns the new value.
    pub fn incr_and_get(&self) -> i64 {
        let mut updated = 0;
        self.tx.send_modify(|current| {
            *current += 1;
            updated = *current;
        });
        updated
    }

    /// Decrements, notifies waiters, and returns the new value.
    pub fn decr_and_get(&self) -> i64 {
        let mut updated = 0;
        self.tx.send_modify(|current| {
            *current -= 1;
            updated = *current;
        });
        updated
    }

    /// Waits until the counter is >= `target`, returning the value observed.
    /// Returns immediately if the counter is already there.
    pub async fn wait_seqno_ge(&self, target: i64) -> i64 {
        let mut rx = self.tx.subscribe();
        let value = rx
            .wait_for(|current| *current >= target)
            .await
            .expect("counter sender is kept alive by self for the whole wait");
        *value
    }

    /// Waits until the counter is <= `target`, returning the value observed.
    pub async fn wait_seqno_le(&self, target: i64) -> i64 {
        let mut rx = self.tx.subscribe();
        let value = rx
            .wait_for(|current| *current <= target)
            .await
            .expect("counter sender is kept alive by self for the whole wait");
        *value
    }

    /// Bounded variant of [`wait_seqno_ge`]: true if the target was reached
    /// within `timeout`.
    ///
    /// [`wait_seqno_ge`]: SeqnoCounter::wait_seqno_ge
    pub async fn wait_seqno_ge_timeout(&self, target: i64, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_seqno_ge(target))
            .await
            .is_ok()
    }
}

impl Default for SeqnoCounter {
    fn default() -> Self {
        SeqnoCounter::new(0)
    }
}
