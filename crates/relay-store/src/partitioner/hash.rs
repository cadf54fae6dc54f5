use async_trait::async_trait;

use relay_model::{EventHeader, SHARD_ID_UNKNOWN, hash_partition};

use crate::error::PartitionError;
use crate::partitioner::{Partitioner, PartitionerResponse, check_task};

/// Partitions by a stable hash of the shard name. Events on the unknown
/// shard cannot be parallelized and come back critical.
pub struct HashPartitioner {
    partitions: usize,
}

impl HashPartitioner {
    pub fn new(partitions: usize) -> Result<Self, PartitionError> {
        if partitions == 0 {
            return Err(PartitionError::NoPartitions);
        }
        Ok(HashPartitioner { partitions })
    }
}

#[async_trait]
impl Partitioner for HashPartitioner {
    fn partitions(&self) -> usize {
        self.partitions
    }

    async fn partition(
        &self,
        header: &EventHeader,
        task_id: usize,
    ) -> Result<PartitionerResponse, PartitionError> {
        check_task(task_id, self.partitions)?;
        Ok(PartitionerResponse {
            partition: hash_partition(&header.shard_id, self.partitions),
            critical: header.shard_id == SHARD_ID_UNKNOWN,
        })
    }
}
