use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::IntervalError;

#[derive(Debug, Clone, Copy)]
struct LowWatermark {
    time: i64,
    complete: bool,
}

#[derive(Debug, Default)]
struct GuardInner {
    /// task id -> (seqno, time)
    slots: HashMap<usize, (i64, i64)>,
    /// (seqno, task id) -> time; `(seqno, task id)` is unique, so this is a
    /// total order over the slots with O(log N) reposition per report.
    ordered: BTreeMap<(i64, usize), i64>,
}

/// Tracks the `(seqno, time)` pair each of a fixed set of concurrent workers
/// has reached, so upstream flow control can see how far the slowest worker
/// lags the fastest and throttle extraction before unbounded buffering
/// builds up. A worker's seqno must never move backward.
///
/// Cheap to clone; clones share the same slot set.
#[derive(Clone)]
pub struct IntervalGuard {
    shared: Arc<Shared>,
}

struct Shared {
    size: usize,
    inner: Mutex<GuardInner>,
    low_tx: watch::Sender<LowWatermark>,
}

impl IntervalGuard {
    /// Creates a guard for `size` workers. Waits are only valid once all
    /// `size` workers have reported at least once.
    pub fn new(size: usize) -> Self {
        let (low_tx, _rx) = watch::channel(LowWatermark {
            time: i64::MIN,
            complete: false,
        });
        IntervalGuard {
            shared: Arc::new(Shared {
                size,
                inner: Mutex::new(GuardInner::default()),
                low_tx,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Upserts the calling worker's position and wakes waiters.
    pub fn report(&self, task_id: usize, seqno: i64, time: i64) -> Result<(), IntervalError> {
        let mut inner = self.lock();
        if task_id >= self.shared.size {
            return Err(IntervalError::SlotOutOfRange {
                task_id,
                size: self.shared.size,
            });
        }

        if let Some(&(previous, _)) = inner.slots.get(&task_id) {
            if seqno < previous {
                return Err(IntervalError::SeqnoMovedBack {
                    task_id,
                    previous,
                    new: seqno,
                });
            }
            inner.ordered.remove(&(previous, task_id));
        }
        inner.slots.insert(task_id, (seqno, time));
        inner.ordered.insert((seqno, task_id), time);

        // Publish the low watermark while still holding the lock so waiters
        // observe mutations in report order.
        let (_, &low_time) = inner
            .ordered
            .first_key_value()
            .expect("ordered set non-empty after insert");
        let complete = inner.slots.len() == self.shared.size;
        self.shared
            .low_tx
            .send_replace(LowWatermark {
                time: low_time,
                complete,
            });
        Ok(())
    }

    /// Lowest seqno across all slots, or -1 if nothing has reported.
    pub fn low_seqno(&self) -> i64 {
        self.lock()
            .ordered
            .first_key_value()
            .map(|((seqno, _), _)| *seqno)
            .unwrap_or(-1)
    }

    /// Lowest time across all slots, or -1 if nothing has reported.
    pub fn low_time(&self) -> i64 {
        self.lock()
            .ordered
            .first_key_value()
            .map(|(_, time)| *time)
            .unwrap_or(-1)
    }

    /// Highest seqno across all slots, or -1 if nothing has reported.
    pub fn hi_seqno(&self) -> i64 {
        self.lock()
            .ordered
            .last_key_value()
            .map(|((seqno, _), _)| *seqno)
            .unwrap_or(-1)
    }

    /// Highest time across all slots, or -1 if nothing has reported.
    pub fn hi_time(&self) -> i64 {
        self.lock()
            .ordered
            .last_key_value()
            .map(|(_, time)| *time)
            .unwrap_or(-1)
    }

    /// Time spread between the fastest and slowest worker.
    pub fn interval(&self) -> i64 {
        let inner = self.lock();
        match (
            inner.ordered.last_key_value(),
            inner.ordered.first_key_value(),
        ) {
            (Some((_, hi)), Some((_, low))) => hi - low,
            _ => 0,
        }
    }

    /// Blocks until the minimum time across all slots is >= `time`, then
    /// returns the (possibly higher) achieved minimum. It is an error to
    /// wait before all workers have reported: the true minimum is unknown.
    pub async fn wait_min_time(&self, time: i64) -> Result<i64, IntervalError> {
        {
            let inner = self.lock();
            if inner.slots.len() != self.shared.size {
                return Err(IntervalError::Incomplete {
                    expected: self.shared.size,
                    actual: inner.slots.len(),
                });
            }
        }
        let mut rx = self.shared.low_tx.subscribe();
        let watermark = rx
            .wait_for(|w| w.complete && w.time >= time)
            .await
            .expect("low watermark sender is kept alive by self for the whole wait");
        Ok(watermark.time)
    }

    /// Invariant check for tests and debugging.
    pub fn validate(&self) -> Result<(), IntervalError> {
        let inner = self.lock();
        if inner.slots.len() != inner.ordered.len() {
            return Err(IntervalError::Corrupt(format!(
                "slot map has {} entries but ordered set has {}",
                inner.slots.len(),
                inner.ordered.len()
            )));
        }
        if inner.slots.len() > self.shared.size {
            return Err(IntervalError::Corrupt(format!(
                "{} slots tracked for a guard of size {}",
                inner.slots.len(),
                self.shared.size
            )));
        }
        for (task_id, &(seqno, time)) in &inner.slots {
            match inner.ordered.get(&(seqno, *task_id)) {
                Some(&ordered_time) if ordered_time == time => {}
                Some(&ordered_time) => {
                    return Err(IntervalError::Corrupt(format!(
                        "task {task_id} time mismatch: slot={time} ordered={ordered_time}"
                    )));
                }
                None => {
                    return Err(IntervalError::Corrupt(format!(
                        "task {task_id} missing from ordered set at seqno {seqno}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_extremes_across_initial_inserts() {
        let guard = IntervalGuard::new(3);

        guard.report(0, 2, 20).unwrap();
        assert_eq!(guard.low_seqno(), 2);
        assert_eq!(guard.hi_seqno(), 2);
        assert_eq!(guard.interval(), 0);
        guard.validate().unwrap();

        guard.report(1, 1, 10).unwrap();
        assert_eq!(guard.low_seqno(), 1);
        assert_eq!(guard.hi_seqno(), 2);
        assert_eq!(guard.low_time(), 10);
        assert_eq!(guard.hi_time(), 20);
        assert_eq!(guard.interval(), 10);
        guard.validate().unwrap();

        guard.report(2, 3, 30).unwrap();
        assert_eq!(guard.low_seqno(), 1);
        assert_eq!(guard.hi_seqno(), 3);
        assert_eq!(guard.interval(), 20);
        guard.validate().unwrap();
    }

    #[test]
    fn repositions_workers_that_pass_their_neighbors() {
        let guard = IntervalGuard::new(3);
        guard.report(0, 1, 10).unwrap();
        guard.report(1, 2, 20).unwrap();
        guard.report(2, 3, 30).unwrap();

        // Head moves past the tail.
        guard.report(0, 8, 80).unwrap();
        assert_eq!(guard.low_seqno(), 2);
        assert_eq!(guard.hi_seqno(), 8);
        guard.validate().unwrap();

        // Middle advances without passing anyone.
        guard.report(2, 7, 70).unwrap();
        assert_eq!(guard.low_seqno(), 2);
        assert_eq!(guard.hi_seqno(), 8);
        guard.validate().unwrap();

        // Former head advances but stays lowest.
        guard.report(1, 6, 60).unwrap();
        assert_eq!(guard.low_seqno(), 6);
        assert_eq!(guard.hi_seqno(), 8);
        assert_eq!(guard.interval(), 20);
        guard.validate().unwrap();
    }

    #[test]
    fn rejects_backward_movement() {
        let guard = IntervalGuard::new(2);
        guard.report(0, 5, 50).unwrap();
        let err = guard.report(0, 4, 40).unwrap_err();
        assert!(matches!(err, IntervalError::SeqnoMovedBack { .. }));
        // Equal seqno re-report is fine (time refresh).
        guard.report(0, 5, 55).unwrap();
        assert_eq!(guard.low_time(), 55);
    }

    #[test]
    fn rejects_unknown_slots() {
        let guard = IntervalGuard::new(2);
        let err = guard.report(2, 1, 10).unwrap_err();
        assert!(matches!(err, IntervalError::SlotOutOfRange { .. }));
    }

    #[test]
    fn randomized_reports_keep_the_guard_consistent() {
        let guard = IntervalGuard::new(4);
        let mut positions = [0i64; 4];
        // Deterministic LCG so the sequence is reproducible.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            state >> 33
        };

        for task in 0..4 {
            guard.report(task, 0, 0).unwrap();
        }
        for _ in 0..2000 {
            let task = (next() % 4) as usize;
            positions[task] += (next() % 5) as i64;
            let seqno = positions[task];
            guard.report(task, seqno, seqno * 10).unwrap();
            guard.validate().unwrap();

            let low = *positions.iter().min().unwrap();
            let hi = *positions.iter().max().unwrap();
            assert_eq!(guard.low_seqno(), low);
            assert_eq!(guard.hi_seqno(), hi);
        }
    }

    #[tokio::test]
    async fn wait_min_time_requires_all_workers() {
        let guard = IntervalGuard::new(2);
        guard.report(0, 1, 10).unwrap();
        let err = guard.wait_min_time(5).await.unwrap_err();
        assert!(matches!(err, IntervalError::Incomplete { .. }));
    }

    #[tokio::test]
    async fn wait_min_time_releases_when_slowest_catches_up() {
        let guard = IntervalGuard::new(2);
        guard.report(0, 10, 100).unwrap();
        guard.report(1, 1, 10).unwrap();

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.wait_min_time(50).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        guard.report(1, 5, 50).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 50);
    }
}
