use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use relay_core::SeqnoCounter;
use relay_model::{EventHeader, ReplEvent, StatusReport};

use crate::error::StoreError;
use crate::partitioner::Partitioner;
use crate::queue::BoundedQueue;
use crate::store::{Store, check_partition};

/// Parallel queue store: fans a serial event stream into N apply channels
/// through an internal partitioner, preserving per-shard order.
///
/// Critical events run in isolation. Before one is enqueued, every channel
/// is drained to quiescence — the applied watermark (fed by
/// `set_last_header`) must catch up with the enqueued watermark, so events
/// still being applied count as in flight — and the store waits for the
/// critical event itself to be applied before resuming parallel flow.
///
/// Control events are replicated to every partition so all consumers
/// observe stop markers and watermarks.
///
/// `put` follows the one-producer discipline: a single upstream task feeds
/// the store, so the drain protocol never races another producer.
pub struct ParallelQueueStore {
    name: String,
    queues: Vec<BoundedQueue<ReplEvent>>,
    partitioner: Arc<dyn Partitioner>,
    last_headers: Mutex<Vec<Option<EventHeader>>>,
    /// Highest data-event seqno enqueued per partition; -1 when none yet.
    enqueued: Mutex<Vec<i64>>,
    /// Highest applied seqno per partition, advanced by `set_last_header`.
    applied: Vec<SeqnoCounter>,
    event_count: AtomicU64,
    critical_count: AtomicU64,
}

impl ParallelQueueStore {
    pub fn new(
        name: impl Into<String>,
        partitions: usize,
        max_size: usize,
        partitioner: Arc<dyn Partitioner>,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        if max_size == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        if partitions == 0 {
            return Err(crate::error::PartitionError::NoPartitions.into());
        }
        if partitioner.partitions() != partitions {
            return Err(StoreError::PartitionerMismatch {
                store: name,
                partitions,
                partitioner_partitions: partitioner.partitions(),
            });
        }
        Ok(ParallelQueueStore {
            name,
            queues: (0..partitions).map(|_| BoundedQueue::new(max_size)).collect(),
            partitioner,
            last_headers: Mutex::new(vec![None; partitions]),
            enqueued: Mutex::new(vec![-1; partitions]),
            applied: (0..partitions).map(|_| SeqnoCounter::new(-1)).collect(),
            event_count: AtomicU64::new(0),
            critical_count: AtomicU64::new(0),
        })
    }

    async fn enqueue(&self, partition: usize, event: ReplEvent) -> Result<(), StoreError> {
        let seqno = match &event {
            ReplEvent::Dbms(e) => Some(e.seqno()),
            ReplEvent::Control(_) => None,
        };
        self.queues[partition]
            .put(event)
            .await
            .map_err(|_| StoreError::Closed(self.name.clone()))?;
        if let Some(seqno) = seqno {
            let mut enqueued = self.lock_enqueued();
            if enqueued[partition] < seqno {
                enqueued[partition] = seqno;
            }
        }
        self.event_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Waits until a partition's applied watermark has caught up with its
    /// enqueued watermark.
    async fn drain_partition(&self, partition: usize) {
        let target = self.lock_enqueued()[partition];
        if target >= 0 {
            self.applied[partition].wait_seqno_ge(target).await;
        }
    }

    async fn drain_all(&self) {
        for partition in 0..self.queues.len() {
            self.drain_partition(partition).await;
        }
    }

    fn lock_enqueued(&self) -> std::sync::MutexGuard<'_, Vec<i64>> {
        self.enqueued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_headers(&self) -> std::sync::MutexGuard<'_, Vec<Option<EventHeader>>> {
        self.last_headers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for ParallelQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn partitions(&self) -> usize {
        self.queues.len()
    }

    async fn put(&self, task_id: usize, event: ReplEvent) -> Result<(), StoreError> {
        match &event {
            ReplEvent::Control(_) => {
                for partition in 0..self.queues.len() {
                    self.enqueue(partition, event.clone()).await?;
                }
                Ok(())
            }
            ReplEvent::Dbms(dbms) => {
                let response = self.partitioner.partition(dbms.header(), task_id).await?;
                check_partition(&self.name, response.partition, self.queues.len())?;
                if response.critical {
                    self.critical_count.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        store = %self.name,
                        seqno = dbms.seqno(),
                        shard_id = dbms.shard_id(),
                        "Draining channels for critical event"
                    );
                    self.drain_all().await;
                    self.enqueue(response.partition, event).await?;
                    self.drain_partition(response.partition).await;
                } else {
                    self.enqueue(response.partition, event).await?;
                }
                Ok(())
            }
        }
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
        self.applied[task_id].set_seqno(header.seqno);
        let mut headers = self.lock_headers();
        // Replicated control markers can carry a header older than the
        // partition's own stream; never move the restart position back.
        let stale = headers[task_id]
            .as_ref()
            .is_some_and(|current| header.position() < current.position());
        if !stale {
            headers[task_id] = Some(header);
        }
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
            .set("eventCount", self.event_count.load(Ordering::Relaxed))
            .set("criticalEvents", self.critical_count.load(Ordering::Relaxed));
        for (index, queue) in self.queues.iter().enumerate() {
            status.set(format!("storeSize.{index}"), queue.len());
        }
        status
    }

    fn release(&self) {
        for queue in &self.queues {
            queue.close();
        }
        // Wake any producer parked in a drain; its next queue operation
        // observes the closed store.
        for counter in &self.applied {
            counter.set_seqno(i64::MAX);
        }
    }
}
