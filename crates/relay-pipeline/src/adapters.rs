use async_trait::async_trait;
use std::sync::Arc;

use relay_model::{EventHeader, ReplDbmsEvent, ReplEvent};
use relay_store::Store;

use crate::contracts::{Applier, Extractor};
use crate::error::{ApplyError, ExtractError};

/// Presents one partition of a store as a stage extractor.
pub struct QueueExtractor {
    store: Arc<dyn Store>,
    partition: usize,
}

impl QueueExtractor {
    pub fn new(store: Arc<dyn Store>, partition: usize) -> Self {
        QueueExtractor { store, partition }
    }
}

#[async_trait]
impl Extractor for QueueExtractor {
    async fn extract(&mut self) -> Result<Option<ReplEvent>, ExtractError> {
        let event = self.store.get(self.partition).await?;
        Ok(Some(event))
    }

    async fn extract_from(&mut self, event_id: &str) -> Result<Option<ReplEvent>, ExtractError> {
        Err(ExtractError::SeekUnsupported(format!(
            "queue store '{}' holds no history to seek to '{event_id}'",
            self.store.name()
        )))
    }

    async fn current_resource_event_id(&self) -> Result<Option<String>, ExtractError> {
        Ok(self
            .store
            .peek(self.partition)
            .await?
            .map(|event| event.header().event_id.clone()))
    }

    fn set_last_event_id(&mut self, _event_id: Option<&str>) -> Result<(), ExtractError> {
        // Queue stores re-derive position from their last header instead.
        Ok(())
    }

    async fn has_more_events(&self) -> bool {
        self.store.len(self.partition).map(|len| len > 0).unwrap_or(false)
    }
}

/// Presents a store as a stage applier. The task id doubles as the target
/// partition for plain multi-queues; stores with an internal partitioner
/// route the event themselves.
pub struct QueueApplier {
    store: Arc<dyn Store>,
    task_id: usize,
}

impl QueueApplier {
    pub fn new(store: Arc<dyn Store>, task_id: usize) -> Self {
        QueueApplier { store, task_id }
    }
}

#[async_trait]
impl Applier for QueueApplier {
    fn set_task_id(&mut self, task_id: usize) {
        self.task_id = task_id;
    }

    async fn apply(
        &mut self,
        event: &ReplDbmsEvent,
        do_commit: bool,
        _do_rollback: bool,
        _sync_log: bool,
    ) -> Result<(), ApplyError> {
        self.store
            .put(self.task_id, ReplEvent::Dbms(event.clone()))
            .await?;
        if do_commit {
            self.store.set_last_header(self.task_id, event.header().clone())?;
        }
        Ok(())
    }

    async fn update_position(
        &mut self,
        header: &EventHeader,
        do_commit: bool,
        _sync_log: bool,
    ) -> Result<(), ApplyError> {
        if do_commit {
            self.store.set_last_header(self.task_id, header.clone())?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ApplyError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ApplyError> {
        Ok(())
    }

    async fn last_event(&mut self) -> Result<Option<EventHeader>, ApplyError> {
        Ok(self.store.last_header(self.task_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_model::{DbmsData, ReplDbmsEvent};
    use relay_store::InMemoryQueue;

    fn event(seqno: i64) -> ReplDbmsEvent {
        let header = EventHeader {
            seqno,
            fragno: 0,
            last_frag: true,
            source_id: "db1".into(),
            epoch_number: 0,
            event_id: format!("log:{seqno}"),
            shard_id: "shop".into(),
            source_tstamp: Utc::now(),
        };
        ReplDbmsEvent::new(header, vec![DbmsData::statement("SELECT 1")])
    }

    #[tokio::test]
    async fn round_trips_through_store_adapters() {
        let store: Arc<dyn Store> = Arc::new(InMemoryQueue::new("q", 4).unwrap());
        let mut applier = QueueApplier::new(store.clone(), 0);
        let mut extractor = QueueExtractor::new(store.clone(), 0);

        applier.apply(&event(1), true, false, false).await.unwrap();
        assert!(extractor.has_more_events().await);
        assert_eq!(
            extractor.current_resource_event_id().await.unwrap(),
            Some("log:1".to_string())
        );

        let got = extractor.extract().await.unwrap().unwrap();
        assert_eq!(got.seqno(), 1);
        assert!(!extractor.has_more_events().await);
        assert_eq!(applier.last_event().await.unwrap().unwrap().seqno, 1);
    }

    #[tokio::test]
    async fn queue_extractor_cannot_seek() {
        let store: Arc<dyn Store> = Arc::new(InMemoryQueue::new("q", 4).unwrap());
        let mut extractor = QueueExtractor::new(store, 0);
        assert!(matches!(
            extractor.extract_from("log:5").await,
            Err(ExtractError::SeekUnsupported(_))
        ));
    }
}
