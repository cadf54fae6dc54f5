use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{EventDispatcher, Metrics, Notification};
use relay_store::Store;

use crate::contracts::{Applier, Extractor, Filter};
use crate::error::{ConfigError, PipelineError, ProcessingError};
use crate::progress::StageProgressTracker;
use crate::task::StageTask;

/// Stage and task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    Prepared,
    Running,
    Stopped,
    Released,
}

/// Everything one stage task needs: its extractor, filter chain, and
/// applier. Each task owns its own instances.
pub struct TaskWiring {
    pub extractor: Box<dyn Extractor>,
    pub filters: Vec<Box<dyn Filter>>,
    pub applier: Box<dyn Applier>,
    /// Store (and partition) backing the extractor, if any. Processed
    /// headers are acknowledged to it for restart bookkeeping and drain
    /// watermarks.
    pub source: Option<(Arc<dyn Store>, usize)>,
}

/// One step of the pipeline, executed by `task_count` workers wired to an
/// extractor, filter chain, and applier each.
pub struct Stage {
    name: String,
    task_count: usize,
    block_commit_count: u64,
    progress: Arc<StageProgressTracker>,
    state: Mutex<StageState>,
    wirings: Mutex<Option<Vec<TaskWiring>>>,
    handles: Mutex<Vec<JoinHandle<Result<(), ProcessingError>>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        wirings: Vec<TaskWiring>,
        block_commit_count: u64,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if wirings.is_empty() {
            return Err(ConfigError::ZeroTasks { stage: name });
        }
        let task_count = wirings.len();
        Ok(Stage {
            progress: Arc::new(StageProgressTracker::new(&name, task_count)),
            name,
            task_count,
            block_commit_count: block_commit_count.max(1),
            state: Mutex::new(StageState::Created),
            wirings: Mutex::new(Some(wirings)),
            handles: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn state(&self) -> StageState {
        *self.lock_state()
    }

    pub fn progress(&self) -> &Arc<StageProgressTracker> {
        &self.progress
    }

    /// Resolves once every task of this stage has processed through `seqno`.
    pub async fn watch_processed_seqno(&self, seqno: i64) {
        self.progress.watch_processed_seqno(seqno).await;
    }

    pub fn prepare(&self) -> Result<(), PipelineError> {
        self.transition(StageState::Created, StageState::Prepared)
    }

    /// Spawns the stage's worker tasks. `cancel` governs their shutdown;
    /// the stage keeps a handle on it so `shutdown` can interrupt blocked
    /// workers.
    pub fn start(
        &self,
        dispatcher: Arc<EventDispatcher>,
        metrics: Metrics,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        self.transition(StageState::Prepared, StageState::Running)?;
        let wirings = self
            .lock_wirings()
            .take()
            .expect("wirings are present until the first start");

        info!(stage = %self.name, tasks = self.task_count, "Starting stage");
        let _ = dispatcher.post(Notification::StageStarted {
            stage: self.name.clone(),
            task_count: self.task_count,
        });

        let mut handles = self.lock_handles();
        for (task_id, mut wiring) in wirings.into_iter().enumerate() {
            wiring.applier.set_task_id(task_id);
            let task = StageTask::new(
                self.name.clone(),
                task_id,
                wiring.extractor,
                wiring.filters,
                wiring.applier,
                wiring.source,
                self.progress.clone(),
                dispatcher.clone(),
                metrics.clone(),
                cancel.child_token(),
                self.block_commit_count,
            );
            handles.push(tokio::spawn(task.run()));
        }
        *self.lock_cancel() = Some(cancel);
        Ok(())
    }

    /// Interrupts all task threads and waits for them to unwind, returning
    /// any processing failures they reported. Idempotent once stopped.
    pub async fn shutdown(&self) -> Vec<ProcessingError> {
        {
            let mut state = self.lock_state();
            match *state {
                StageState::Running => *state = StageState::Stopped,
                _ => return Vec::new(),
            }
        }
        if let Some(cancel) = self.lock_cancel().take() {
            cancel.cancel();
        }

        let handles = std::mem::take(&mut *self.lock_handles());
        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => warn!(stage = %self.name, error = ?e, "Stage task panicked"),
            }
        }
        info!(stage = %self.name, failures = failures.len(), "Stage stopped");
        failures
    }

    pub fn release(&self) -> Result<(), PipelineError> {
        let mut state = self.lock_state();
        match *state {
            // A stage that never ran can be released directly.
            StageState::Prepared | StageState::Stopped => {
                *state = StageState::Released;
                Ok(())
            }
            actual => Err(PipelineError::InvalidState {
                component: format!("stage '{}'", self.name),
                expected: StageState::Stopped,
                actual,
            }),
        }
    }

    fn transition(&self, expected: StageState, next: StageState) -> Result<(), PipelineError> {
        let mut state = self.lock_state();
        if *state != expected {
            return Err(PipelineError::InvalidState {
                component: format!("stage '{}'", self.name),
                expected,
                actual: *state,
            });
        }
        *state = next;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StageState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_wirings(&self) -> std::sync::MutexGuard<'_, Option<Vec<TaskWiring>>> {
        self.wirings.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_handles(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<JoinHandle<Result<(), ProcessingError>>>> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|p| p.into_inner())
    }
}
