use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_model::{EventHeader, ReplEvent, StatusReport};

use crate::error::StoreError;
use crate::queue::BoundedQueue;
use crate::store::{Store, check_partition};

/// In-memory store with N independent bounded queues. The partition index
/// is chosen by the caller (normally an upstream partitioner), and restart
/// headers are tracked per partition so each parallel channel can resume
/// independently.
pub struct InMemoryMultiQueue {
    name: String,
    queues: Vec<BoundedQueue<ReplEvent>>,
    last_headers: Mutex<Vec<Option<EventHeader>>>,
    event_count: AtomicU64,
}

impl InMemoryMultiQueue {
    pub fn new(
        name: impl Into<String>,
        partitions: usize,
        max_size: usize,
    ) -> Result<Self, StoreError> {
        if max_size == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        if partitions == 0 {
            return Err(crate::error::PartitionError::NoPartitions.into());
        }
        Ok(InMemoryMultiQueue {
            name: name.into(),
            queues: (0..partitions).map(|_| BoundedQueue::new(max_size)).collect(),
            last_headers: Mutex::new(vec![None; partitions]),
            event_count: AtomicU64::new(0),
        })
    }

    fn lock_headers(&self) -> std::sync::MutexGuard<'_, Vec<Option<EventHeader>>> {
        self.last_headers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for InMemoryMultiQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn partitions(&self) -> usize {
        self.queues.len()
    }

    async fn put(&self, task_id: usize, event: ReplEvent) -> Result<(), StoreError> {
        check_partition(&self.name, task_id, self.queues.len())?;
        self.queues[task_id]
            .put(event)
            .await
            .map_err(|_| StoreError::Closed(self.name.clone()))?;
        self.event_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, partition: usize) -> Result<ReplEvent, StoreError> {
        check_partition(&self.name, partition, self.queues.len())?;
        self.queues[partition]
            .take()
            .await
            .map_err(|_| StoreError::Closed(self.name.clone()))
    }

    async fn peek(&self, partition: usize) -> Result<Option<ReplEvent>, StoreError> {
        check_partition(&self.name, partition, self.queues.len())?;
        Ok(self.queues[partition].peek())
    }

    fn len(&self, partition: usize) -> Result<usize, StoreError> {
        check_partition(&self.name, partition, self.queues.len())?;
        Ok(self.queues[partition].len())
    }

    fn set_last_header(&self, task_id: usize, header: EventHeader) -> Result<(), StoreError> {
        check_partition(&self.name, task_id, self.queues.len())?;
        self.lock_headers()[task_id] = Some(header);
        Ok(())
    }

    fn last_header(&self, task_id: usize) -> Result<Option<EventHeader>, StoreError> {
        check_partition(&self.name, task_id, self.queues.len())?;
        Ok(self.lock_headers()[task_id].clone())
    }

    fn status(&self) -> StatusReport {
        let mut status = StatusReport::new();
        status
            .set("partitions", self.queues.len())
            .set("maxSize", self.queues[0].capacity())
            .set("eventCount", self.event_count.load(Ordering::Relaxed));
        for (index, queue) in self.queues.iter().enumerate() {
            status.set(format!("storeSize.{index}"), queue.len());
        }
        status
    }

    fn release(&self) {
        for queue in &self.queues {
            queue.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_model::{DbmsData, ReplDbmsEvent};

    fn event(seqno: i64) -> ReplEvent {
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
        ReplDbmsEvent::new(header, vec![DbmsData::statement("SELECT 1")]).into()
    }

    #[tokio::test]
    async fn partitions_are_fifo_and_independent() {
        let store = InMemoryMultiQueue::new("mq", 3, 8).unwrap();

        // Interleave puts across partitions.
        for seqno in 0..12 {
            store.put((seqno % 3) as usize, event(seqno)).await.unwrap();
        }

        // Each partition yields its own events in insertion order, never
        // another partition's.
        for partition in 0..3 {
            for round in 0..4 {
                let got = store.get(partition).await.unwrap();
                assert_eq!(got.seqno(), round * 3 + partition as i64);
            }
        }
    }

    #[tokio::test]
    async fn restart_headers_are_per_partition() {
        let store = InMemoryMultiQueue::new("mq", 2, 4).unwrap();
        let e0 = event(10);
        let e1 = event(11);
        store.set_last_header(0, e0.header().clone()).unwrap();
        store.set_last_header(1, e1.header().clone()).unwrap();

        assert_eq!(store.last_header(0).unwrap().unwrap().seqno, 10);
        assert_eq!(store.last_header(1).unwrap().unwrap().seqno, 11);
    }

    #[tokio::test]
    async fn zero_partitions_is_a_configuration_error() {
        assert!(InMemoryMultiQueue::new("mq", 0, 4).is_err());
    }
}
