use std::sync::Mutex;

use relay_core::error::IntervalError;
use relay_core::{IntervalGuard, SeqnoCounter};
use relay_model::EventHeader;

/// Snapshot of one task's progress, for status reporting.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pub task_id: usize,
    pub events_applied: u64,
    pub events_filtered: u64,
    pub last_header: Option<EventHeader>,
}

/// Tracks per-task applied positions for one stage: a seqno counter per
/// task for watch/drain logic and an interval guard bounding how far the
/// slowest task lags the fastest.
pub struct StageProgressTracker {
    stage: String,
    counters: Vec<SeqnoCounter>,
    guard: IntervalGuard,
    tasks: Mutex<Vec<TaskProgress>>,
}

impl StageProgressTracker {
    pub fn new(stage: impl Into<String>, task_count: usize) -> Self {
        StageProgressTracker {
            stage: stage.into(),
            counters: (0..task_count).map(|_| SeqnoCounter::new(-1)).collect(),
            guard: IntervalGuard::new(task_count),
            tasks: Mutex::new(
                (0..task_count)
                    .map(|task_id| TaskProgress {
                        task_id,
                        ..TaskProgress::default()
                    })
                    .collect(),
            ),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn task_count(&self) -> usize {
        self.counters.len()
    }

    /// Records an applied (or position-updated) event for a task. Progress
    /// is monotonic: a control marker replicated across partitions can
    /// trail the partition's own stream, and such stale positions are
    /// counted without moving the watermarks back.
    pub fn record_applied(
        &self,
        task_id: usize,
        header: &EventHeader,
    ) -> Result<(), IntervalError> {
        let counter = &self.counters[task_id];
        let mut tasks = self.lock_tasks();
        tasks[task_id].events_applied += 1;
        if header.seqno >= counter.seqno() {
            tasks[task_id].last_header = Some(header.clone());
            drop(tasks);
            counter.set_seqno(header.seqno);
            self.guard
                .report(task_id, header.seqno, header.source_tstamp.timestamp_millis())?;
        }
        Ok(())
    }

    pub fn record_filtered(&self, task_id: usize) {
        self.lock_tasks()[task_id].events_filtered += 1;
    }

    /// Minimum seqno every task has reached; -1 until all tasks have
    /// applied something.
    pub fn committed_seqno(&self) -> i64 {
        self.counters
            .iter()
            .map(|counter| counter.seqno())
            .min()
            .unwrap_or(-1)
    }

    /// Resolves once every task has processed at least through `seqno`.
    pub async fn watch_processed_seqno(&self, seqno: i64) {
        for counter in &self.counters {
            counter.wait_seqno_ge(seqno).await;
        }
    }

    pub fn interval_guard(&self) -> &IntervalGuard {
        &self.guard
    }

    pub fn task_progress(&self) -> Vec<TaskProgress> {
        self.lock_tasks().clone()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<TaskProgress>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
