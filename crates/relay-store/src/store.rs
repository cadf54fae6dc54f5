use async_trait::async_trait;

use relay_model::{EventHeader, ReplEvent, StatusReport};

use crate::error::StoreError;

/// A named, bounded FIFO (or set of per-partition FIFOs) connecting two
/// pipeline stages. Capacity is fixed at construction (pipeline prepare
/// time); `put` suspends when full and `get` when empty — full/empty are
/// blocking conditions, never errors. Contents do not survive a process
/// restart; loss across restart is bounded by upstream re-extraction from
/// the last recorded header.
#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    fn partitions(&self) -> usize;

    /// Enqueues an event. For partitioned stores `task_id` identifies the
    /// producing task; stores with an internal partitioner route the event
    /// themselves, others treat it as the target partition index.
    async fn put(&self, task_id: usize, event: ReplEvent) -> Result<(), StoreError>;

    /// Removes and returns the next event from a partition.
    async fn get(&self, partition: usize) -> Result<ReplEvent, StoreError>;

    /// Returns without removing the next event from a partition, or `None`
    /// if the partition is empty.
    async fn peek(&self, partition: usize) -> Result<Option<ReplEvent>, StoreError>;

    fn len(&self, partition: usize) -> Result<usize, StoreError>;

    /// Records the last header processed downstream of this store, per
    /// task/partition. Required for restart.
    fn set_last_header(&self, task_id: usize, header: EventHeader) -> Result<(), StoreError>;

    fn last_header(&self, task_id: usize) -> Result<Option<EventHeader>, StoreError>;

    fn status(&self) -> StatusReport;

    /// Releases the store: closes the queues (waking blocked callers with
    /// [`StoreError::Closed`]) and drops contents.
    fn release(&self);
}

pub(crate) fn check_partition(
    store: &str,
    partition: usize,
    partitions: usize,
) -> Result<(), StoreError> {
    if partition >= partitions {
        return Err(StoreError::InvalidPartition {
            store: store.to_string(),
            partition,
            partitions,
        });
    }
    Ok(())
}
