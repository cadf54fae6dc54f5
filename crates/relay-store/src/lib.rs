pub mod error;
pub mod in_memory;
pub mod multi_queue;
pub mod parallel;
pub mod partitioner;
pub mod prefetch;
mod queue;
pub mod store;

pub use error::{PartitionError, StoreError};
pub use in_memory::InMemoryQueue;
pub use multi_queue::InMemoryMultiQueue;
pub use parallel::ParallelQueueStore;
pub use partitioner::{
    HashPartitioner, Partitioner, PartitionerResponse, RoundRobinPartitioner, ShardListPartitioner,
};
pub use prefetch::{CommitPositionProbe, PrefetchConfig, PrefetchQueue};
pub use store::Store;
