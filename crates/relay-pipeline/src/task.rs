use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use relay_core::{EventDispatcher, Metrics, Notification};
use relay_model::{ControlKind, EventHeader, ReplEvent};
use relay_store::{Store, StoreError};

use crate::contracts::{Applier, Extractor, Filter};
use crate::error::{ExtractError, ProcessingError};
use crate::progress::StageProgressTracker;

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// One worker of a stage: pulls events from its extractor, runs the filter
/// chain, and hands survivors to its applier, recording progress as it goes.
pub(crate) struct StageTask {
    stage: String,
    task_id: usize,
    extractor: Box<dyn Extractor>,
    filters: Vec<Box<dyn Filter>>,
    applier: Box<dyn Applier>,
    /// Upstream store to acknowledge processed headers to, when the
    /// extractor is store-backed. Feeds restart bookkeeping and the
    /// parallel store's drain watermark.
    source: Option<(Arc<dyn Store>, usize)>,
    progress: Arc<StageProgressTracker>,
    dispatcher: Arc<EventDispatcher>,
    metrics: Metrics,
    cancel: CancellationToken,
    block_commit_count: u64,
    txns_since_commit: u64,
    processed: u64,
}

impl StageTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: String,
        task_id: usize,
        extractor: Box<dyn Extractor>,
        filters: Vec<Box<dyn Filter>>,
        applier: Box<dyn Applier>,
        source: Option<(Arc<dyn Store>, usize)>,
        progress: Arc<StageProgressTracker>,
        dispatcher: Arc<EventDispatcher>,
        metrics: Metrics,
        cancel: CancellationToken,
        block_commit_count: u64,
    ) -> Self {
        StageTask {
            stage,
            task_id,
            extractor,
            filters,
            applier,
            source,
            progress,
            dispatcher,
            metrics,
            cancel,
            block_commit_count,
            txns_since_commit: 0,
            processed: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), ProcessingError> {
        info!(stage = %self.stage, task_id = self.task_id, "Stage task running");
        let cancel = self.cancel.clone();

        loop {
            let extracted = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.extractor.extract() => result,
            };

            let event = match extracted {
                Ok(Some(event)) => event,
                Ok(None) => {
                    // Nothing available right now; back off briefly without
                    // going deaf to shutdown.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    }
                    continue;
                }
                // A store closed underneath us is the release path, not a
                // processing failure.
                Err(ExtractError::Store(StoreError::Closed(_))) => break,
                Err(e) => {
                    let seqno = self.progress.committed_seqno();
                    return Err(self.fail(seqno, String::new(), Box::new(e)));
                }
            };

            // Processing can suspend indefinitely (a full downstream queue,
            // a critical-event drain), so it races shutdown too. An event
            // abandoned mid-flight is re-extracted upstream on restart.
            let flow = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.process(event) => result?,
            };
            if flow == Flow::Stop {
                break;
            }
        }

        info!(
            stage = %self.stage,
            task_id = self.task_id,
            events = self.processed,
            "Stage task finished"
        );
        let _ = self.dispatcher.post(Notification::TaskFinished {
            stage: self.stage.clone(),
            task_id: self.task_id,
            events_processed: self.processed,
        });
        Ok(())
    }

    async fn process(&mut self, event: ReplEvent) -> Result<Flow, ProcessingError> {
        match event {
            ReplEvent::Control(control) => {
                debug!(
                    stage = %self.stage,
                    task_id = self.task_id,
                    seqno = control.header.seqno,
                    kind = ?control.kind,
                    "Control event"
                );
                if let Err(e) = self.applier.update_position(&control.header, true, false).await {
                    return Err(self.event_failure(&control.header, Box::new(e)));
                }
                self.txns_since_commit = 0;
                self.record(&control.header)?;
                if control.kind == ControlKind::Stop {
                    info!(
                        stage = %self.stage,
                        task_id = self.task_id,
                        seqno = control.header.seqno,
                        "Stop marker reached"
                    );
                    return Ok(Flow::Stop);
                }
                Ok(Flow::Continue)
            }
            ReplEvent::Dbms(dbms) => {
                self.metrics.increment_extracted(1);
                let header = dbms.header().clone();

                // Run the filter chain; a None return drops the event.
                let mut current = Some(dbms);
                for filter in &mut self.filters {
                    let Some(event) = current.take() else { break };
                    match filter.filter(event).await {
                        Ok(next) => current = next,
                        Err(e) => return Err(self.event_failure(&header, Box::new(e))),
                    }
                }

                if header.last_frag {
                    self.txns_since_commit += 1;
                }
                let do_commit = header.last_frag
                    && (self.txns_since_commit >= self.block_commit_count
                        || !self.extractor.has_more_events().await);

                match current {
                    Some(event) => {
                        if let Err(e) = self.applier.apply(&event, do_commit, false, false).await {
                            return Err(self.event_failure(&header, Box::new(e)));
                        }
                        self.metrics.increment_applied(1);
                        self.processed += 1;
                    }
                    None => {
                        // Dropped by a filter: the position still moves
                        // forward so restart does not replay it forever.
                        self.metrics.increment_filtered(1);
                        self.progress.record_filtered(self.task_id);
                        if let Err(e) =
                            self.applier.update_position(&header, do_commit, false).await
                        {
                            return Err(self.event_failure(&header, Box::new(e)));
                        }
                    }
                }

                if do_commit {
                    self.txns_since_commit = 0;
                }
                self.record(&header)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Records progress and acknowledges the processed header upstream.
    fn record(&self, header: &EventHeader) -> Result<(), ProcessingError> {
        if let Err(e) = self.progress.record_applied(self.task_id, header) {
            return Err(self.event_failure(header, Box::new(e)));
        }
        if let Some((store, partition)) = &self.source {
            if let Err(e) = store.set_last_header(*partition, header.clone()) {
                return Err(self.event_failure(header, Box::new(e)));
            }
        }
        Ok(())
    }

    fn event_failure(
        &self,
        header: &EventHeader,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> ProcessingError {
        self.fail(header.seqno, header.event_id.clone(), source)
    }

    fn fail(
        &self,
        seqno: i64,
        event_id: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> ProcessingError {
        self.metrics.increment_failures(1);
        error!(
            stage = %self.stage,
            task_id = self.task_id,
            seqno,
            event_id = %event_id,
            error = %source,
            "Stage task failed"
        );
        let _ = self
            .dispatcher
            .post_out_of_band(Notification::ProcessingFailed {
                stage: self.stage.clone(),
                task_id: self.task_id,
                seqno,
                event_id: event_id.clone(),
                message: source.to_string(),
            });
        ProcessingError {
            seqno,
            event_id,
            source,
        }
    }
}
