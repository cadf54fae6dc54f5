use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DispatchError;

/// Notifications flowing from the pipeline to surrounding management code.
#[derive(Debug, Clone)]
pub enum Notification {
    PipelineOnline {
        pipeline: String,
    },
    PipelineOffline {
        pipeline: String,
        planned: bool,
    },
    StageStarted {
        stage: String,
        task_count: usize,
    },
    TaskFinished {
        stage: String,
        task_id: usize,
        events_processed: u64,
    },
    /// A filter or applier failed while processing an event. Carries the
    /// event coordinates so external recovery policy can act.
    ProcessingFailed {
        stage: String,
        task_id: usize,
        seqno: i64,
        event_id: String,
        message: String,
    },
}

#[async_trait]
pub trait NotificationListener: Send + Sync {
    async fn on_notification(&self, notification: &Notification) -> Result<(), DispatchError>;
}

struct Request {
    notification: Notification,
    responder: Option<oneshot::Sender<Result<(), DispatchError>>>,
}

struct DispatcherState {
    receivers: Option<(mpsc::UnboundedReceiver<Request>, mpsc::UnboundedReceiver<Request>)>,
    handle: Option<JoinHandle<()>>,
    running: bool,
}

/// Dispatches notifications to registered listeners from a dedicated task,
/// in strict FIFO order per lane. The out-of-band lane is drained ahead of
/// the ordinary lane so fatal conditions get through even while the ordinary
/// lane is backed up.
pub struct EventDispatcher {
    listeners: Arc<RwLock<Vec<Arc<dyn NotificationListener>>>>,
    tx: mpsc::UnboundedSender<Request>,
    oob_tx: mpsc::UnboundedSender<Request>,
    state: Mutex<DispatcherState>,
    cancel: CancellationToken,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (oob_tx, oob_rx) = mpsc::unbounded_channel();
        EventDispatcher {
            listeners: Arc::new(RwLock::new(Vec::new())),
            tx,
            oob_tx,
            state: Mutex::new(DispatcherState {
                receivers: Some((rx, oob_rx)),
                handle: None,
                running: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Starts the dispatch task. Starting a running dispatcher is an error.
    pub async fn start(&self) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(DispatchError::AlreadyRunning);
        }
        let (rx, oob_rx) = state
            .receivers
            .take()
            .ok_or(DispatchError::AlreadyRunning)?;
        info!("Starting event dispatcher");
        let listeners = self.listeners.clone();
        let cancel = self.cancel.clone();
        state.handle = Some(tokio::spawn(run_loop(listeners, rx, oob_rx, cancel)));
        state.running = true;
        Ok(())
    }

    /// Stops the dispatch task and waits for it to finish. Stopping a
    /// stopped dispatcher is a no-op.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.state.lock().await;
            if !state.running {
                return;
            }
            state.running = false;
            state.handle.take()
        };
        info!("Stopping event dispatcher");
        self.cancel.cancel();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = ?e, "Dispatcher task ended abnormally");
            }
        }
    }

    /// Fire-and-forget delivery on the ordinary lane.
    pub fn post(&self, notification: Notification) -> Result<(), DispatchError> {
        self.tx
            .send(Request {
                notification,
                responder: None,
            })
            .map_err(|_| DispatchError::Closed)
    }

    /// Fire-and-forget delivery on the out-of-band lane. Used for critical
    /// conditions that must not queue behind ordinary notifications.
    pub fn post_out_of_band(&self, notification: Notification) -> Result<(), DispatchError> {
        self.oob_tx
            .send(Request {
                notification,
                responder: None,
            })
            .map_err(|_| DispatchError::Closed)
    }

    /// Blocks the caller until all listeners have run, rethrowing the first
    /// listener error.
    pub async fn post_sync(&self, notification: Notification) -> Result<(), DispatchError> {
        let (responder, response) = oneshot::channel();
        self.tx
            .send(Request {
                notification,
                responder: Some(responder),
            })
            .map_err(|_| DispatchError::Closed)?;
        response.await.map_err(|_| DispatchError::Closed)?
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        EventDispatcher::new()
    }
}

async fn run_loop(
    listeners: Arc<RwLock<Vec<Arc<dyn NotificationListener>>>>,
    mut rx: mpsc::UnboundedReceiver<Request>,
    mut oob_rx: mpsc::UnboundedReceiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Dispatcher loop terminated by cancellation");
                break;
            }
            request = oob_rx.recv() => match request {
                Some(request) => dispatch_one(&listeners, request).await,
                None => break,
            },
            request = rx.recv() => match request {
                Some(request) => {
                    // Out-of-band requests that raced in while we were
                    // waiting still go first.
                    while let Ok(oob) = oob_rx.try_recv() {
                        dispatch_one(&listeners, oob).await;
                    }
                    dispatch_one(&listeners, request).await;
                }
                None => break,
            },
        }
    }
}

async fn dispatch_one(
    listeners: &RwLock<Vec<Arc<dyn NotificationListener>>>,
    request: Request,
) {
    let mut outcome = Ok(());
    let listeners = listeners.read().await;
    for listener in listeners.iter() {
        if let Err(e) = listener.on_notification(&request.notification).await {
            debug!(error = %e, "Listener failed while handling notification");
            outcome = Err(e);
            break;
        }
    }
    drop(listeners);

    match request.responder {
        Some(responder) => {
            // The submitter may have given up waiting; that is not an error.
            let _ = responder.send(outcome);
        }
        None => {
            if let Err(e) = outcome {
                warn!(error = %e, "Listener failed on fire-and-forget notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Recorder {
        seen: StdMutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn new(fail_on: Option<&str>) -> Arc<Self> {
            Arc::new(Recorder {
                seen: StdMutex::new(Vec::new()),
                fail_on: fail_on.map(String::from),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationListener for Recorder {
        async fn on_notification(
            &self,
            notification: &Notification,
        ) -> Result<(), DispatchError> {
            let tag = match notification {
                Notification::StageStarted { stage, .. } => stage.clone(),
                Notification::ProcessingFailed { event_id, .. } => event_id.clone(),
                other => format!("{other:?}"),
            };
            self.seen.lock().unwrap().push(tag.clone());
            if self.fail_on.as_deref() == Some(tag.as_str()) {
                return Err(DispatchError::Listener(format!("boom on {tag}")));
            }
            Ok(())
        }
    }

    fn stage_started(stage: &str) -> Notification {
        Notification::StageStarted {
            stage: stage.into(),
            task_count: 1,
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let dispatcher = EventDispatcher::new();
        let recorder = Recorder::new(None);
        dispatcher.add_listener(recorder.clone()).await;
        dispatcher.start().await.unwrap();

        dispatcher.post(stage_started("a")).unwrap();
        dispatcher.post(stage_started("b")).unwrap();
        dispatcher.post_sync(stage_started("c")).await.unwrap();

        assert_eq!(recorder.seen(), vec!["a", "b", "c"]);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn sync_post_rethrows_listener_error() {
        let dispatcher = EventDispatcher::new();
        let recorder = Recorder::new(Some("bad"));
        dispatcher.add_listener(recorder.clone()).await;
        dispatcher.start().await.unwrap();

        dispatcher.post_sync(stage_started("ok")).await.unwrap();
        let err = dispatcher.post_sync(stage_started("bad")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Listener(_)));

        // The loop survives listener failures.
        dispatcher.post_sync(stage_started("after")).await.unwrap();
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn out_of_band_overtakes_ordinary_lane() {
        let dispatcher = EventDispatcher::new();
        let recorder = Recorder::new(None);
        dispatcher.add_listener(recorder.clone()).await;

        // Queue before starting so both lanes have pending work when the
        // loop begins.
        for name in ["n1", "n2", "n3"] {
            dispatcher.post(stage_started(name)).unwrap();
        }
        dispatcher
            .post_out_of_band(stage_started("urgent"))
            .unwrap();

        dispatcher.start().await.unwrap();
        dispatcher.post_sync(stage_started("tail")).await.unwrap();

        let seen = recorder.seen();
        let urgent_at = seen.iter().position(|s| s == "urgent").unwrap();
        let n1_at = seen.iter().position(|s| s == "n1").unwrap();
        assert!(urgent_at < n1_at, "out-of-band must run first: {seen:?}");
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn start_twice_is_an_error_and_stop_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        dispatcher.start().await.unwrap();
        assert!(matches!(
            dispatcher.start().await,
            Err(DispatchError::AlreadyRunning)
        ));
        dispatcher.stop().await;
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn stop_joins_the_dispatch_task() {
        let dispatcher = EventDispatcher::new();
        let recorder = Recorder::new(None);
        dispatcher.add_listener(recorder.clone()).await;
        dispatcher.start().await.unwrap();
        dispatcher.post_sync(stage_started("x")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), dispatcher.stop())
            .await
            .expect("stop must join promptly");
    }
}
