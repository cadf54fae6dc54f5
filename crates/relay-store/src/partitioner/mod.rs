use async_trait::async_trait;

use relay_model::EventHeader;

use crate::error::PartitionError;

pub mod hash;
pub mod round_robin;
pub mod shard_list;

pub use hash::HashPartitioner;
pub use round_robin::RoundRobinPartitioner;
pub use shard_list::{DefaultAssignment, HashMethod, ShardListPartitioner, ShardMapConfig};

/// Outcome of partitioning one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionerResponse {
    /// Channel the event is assigned to.
    pub partition: usize,
    /// True when the event must run in isolation: the pipeline drains all
    /// channels before and after applying it.
    pub critical: bool,
}

/// Maps an event header to one of N parallel apply channels. For the life
/// of a pipeline the same shard must always resolve to the same partition —
/// restart recovery resumes each channel independently and relies on it —
/// so implementations only inspect header fields that are identical across
/// all fragments of a seqno.
#[async_trait]
pub trait Partitioner: Send + Sync {
    fn partitions(&self) -> usize;

    async fn partition(
        &self,
        header: &EventHeader,
        task_id: usize,
    ) -> Result<PartitionerResponse, PartitionError>;
}

pub(crate) fn check_task(task_id: usize, partitions: usize) -> Result<(), PartitionError> {
    if task_id >= partitions {
        return Err(PartitionError::TaskOutOfRange {
            task_id,
            partitions,
        });
    }
    Ok(())
}
