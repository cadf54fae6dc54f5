use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use relay_model::{EventHeader, ReplEvent, StatusReport};

use crate::error::StoreError;
use crate::queue::BoundedQueue;
use crate::store::{Store, check_partition};

/// In-memory event store with a single bounded queue. Has no memory beyond
/// its current contents.
pub struct InMemoryQueue {
    name: String,
    queue: BoundedQueue<ReplEvent>,
    last_header: Mutex<Option<EventHeader>>,
    event_count: AtomicU64,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>, max_size: usize) -> Result<Self, StoreError> {
        if max_size == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(InMemoryQueue {
            name: name.into(),
            queue: BoundedQueue::new(max_size),
            last_header: Mutex::new(None),
            event_count: AtomicU64::new(0),
        })
    }

    fn record_put(&self) {
        let count = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 10_000 == 0 {
            debug!(store = %self.name, events = count, size = self.queue.len(), "Queue store progress");
        }
    }
}

#[async_trait]
impl Store for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn partitions(&self) -> usize {
        1
    }

    async fn put(&self, task_id: usize, event: ReplEvent) -> Result<(), StoreError> {
        check_partition(&self.name, task_id, 1)?;
        self.queue
            .put(event)
            .await
            .map_err(|_| StoreError::Closed(self.name.clone()))?;
        self.record_put();
        Ok(())
    }

    async fn get(&self, partition: usize) -> Result<ReplEvent, StoreError> {
        check_partition(&self.name, partition, 1)?;
        self.queue
            .take()
            .await
            .map_err(|_| StoreError::Closed(self.name.clone()))
    }

    async fn peek(&self, partition: usize) -> Result<Option<ReplEvent>, StoreError> {
        check_partition(&self.name, partition, 1)?;
        Ok(self.queue.peek())
    }

    fn len(&self, partition: usize) -> Result<usize, StoreError> {
        check_partition(&self.name, partition, 1)?;
        Ok(self.queue.len())
    }

    fn set_last_header(&self, task_id: usize, header: EventHeader) -> Result<(), StoreError> {
        check_partition(&self.name, task_id, 1)?;
        *self.lock_header() = Some(header);
        Ok(())
    }

    fn last_header(&self, task_id: usize) -> Result<Option<EventHeader>, StoreError> {
        check_partition(&self.name, task_id, 1)?;
        Ok(self.lock_header().clone())
    }

    fn status(&self) -> StatusReport {
        let mut status = StatusReport::new();
        status
            .set("storeSize", self.queue.len())
            .set("maxSize", self.queue.capacity())
            .set("eventCount", self.event_count.load(Ordering::Relaxed));
        status
    }

    fn release(&self) {
        self.queue.close();
    }
}

impl InMemoryQueue {
    fn lock_header(&self) -> std::sync::MutexGuard<'_, Option<EventHeader>> {
        self.last_header
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Utc;
    use relay_model::{DbmsData, ReplDbmsEvent};
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) fn event(seqno: i64, shard: &str) -> ReplEvent {
        let header = EventHeader {
            seqno,
            fragno: 0,
            last_frag: true,
            source_id: "db1".into(),
            epoch_number: 0,
            event_id: format!("log:{seqno}"),
            shard_id: shard.into(),
            source_tstamp: Utc::now(),
        };
        ReplDbmsEvent::new(header, vec![DbmsData::statement("SELECT 1")]).into()
    }

    #[tokio::test]
    async fn round_trips_events_in_order() {
        let store = InMemoryQueue::new("q", 4).unwrap();
        for seqno in 0..3 {
            store.put(0, event(seqno, "shop")).await.unwrap();
        }
        for seqno in 0..3 {
            assert_eq!(store.get(0).await.unwrap().seqno(), seqno);
        }
    }

    #[tokio::test]
    async fn rejects_foreign_partitions() {
        let store = InMemoryQueue::new("q", 4).unwrap();
        assert!(matches!(
            store.put(1, event(0, "shop")).await,
            Err(StoreError::InvalidPartition { .. })
        ));
        assert!(store.last_header(3).is_err());
    }

    #[tokio::test]
    async fn tracks_last_header_for_restart() {
        let store = InMemoryQueue::new("q", 4).unwrap();
        assert!(store.last_header(0).unwrap().is_none());
        let ev = event(9, "shop");
        store.set_last_header(0, ev.header().clone()).unwrap();
        assert_eq!(store.last_header(0).unwrap().unwrap().seqno, 9);
    }

    #[tokio::test]
    async fn release_wakes_blocked_consumer() {
        let store = Arc::new(InMemoryQueue::new("q", 1).unwrap());
        let consumer = {
            let store = store.clone();
            tokio::spawn(async move { store.get(0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.release();
        assert!(matches!(
            consumer.await.unwrap(),
            Err(StoreError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn reports_status_counters() {
        let store = InMemoryQueue::new("q", 8).unwrap();
        store.put(0, event(0, "shop")).await.unwrap();
        store.put(0, event(1, "shop")).await.unwrap();
        let status = store.status();
        assert_eq!(status.get("storeSize"), Some("2"));
        assert_eq!(status.get("maxSize"), Some("8"));
        assert_eq!(status.get("eventCount"), Some("2"));
    }
}
