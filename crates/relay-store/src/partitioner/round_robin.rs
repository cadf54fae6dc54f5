use async_trait::async_trait;

use relay_model::EventHeader;

use crate::error::PartitionError;
use crate::partitioner::{Partitioner, PartitionerResponse, check_task};

/// Assigns each successive seqno to the next partition. Used when shard
/// affinity does not matter and the goal is even load distribution.
///
/// Partitioning happens per event, so a transaction split into fragments
/// would be scattered across channels. This partitioner is therefore only
/// valid for single-fragment streams, and it enforces that: fragmented
/// events are rejected instead of silently mis-routed.
pub struct RoundRobinPartitioner {
    partitions: usize,
}

impl RoundRobinPartitioner {
    pub fn new(partitions: usize) -> Result<Self, PartitionError> {
        if partitions == 0 {
            return Err(PartitionError::NoPartitions);
        }
        Ok(RoundRobinPartitioner { partitions })
    }
}

#[async_trait]
impl Partitioner for RoundRobinPartitioner {
    fn partitions(&self) -> usize {
        self.partitions
    }

    async fn partition(
        &self,
        header: &EventHeader,
        task_id: usize,
    ) -> Result<PartitionerResponse, PartitionError> {
        check_task(task_id, self.partitions)?;
        if !header.is_unfragmented() {
            return Err(PartitionError::FragmentedEvent {
                seqno: header.seqno,
                fragno: header.fragno,
                last_frag: header.last_frag,
            });
        }
        Ok(PartitionerResponse {
            partition: header.seqno.rem_euclid(self.partitions as i64) as usize,
            critical: false,
        })
    }
}
