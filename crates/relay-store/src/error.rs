use relay_core::error::ChannelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store '{store}' has no partition {partition} (partitions={partitions})")]
    InvalidPartition {
        store: String,
        partition: usize,
        partitions: usize,
    },

    #[error("store '{0}' is released")]
    Closed(String),

    #[error("store capacity must be positive")]
    ZeroCapacity,

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(
        "store '{store}' has {partitions} partitions but its partitioner \
         covers {partitioner_partitions}"
    )]
    PartitionerMismatch {
        store: String,
        partitions: usize,
        partitioner_partitions: usize,
    },

    #[error("downstream position probe failed: {0}")]
    Probe(String),
}

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("partition count must be positive")]
    NoPartitions,

    #[error("task id {task_id} exceeds available partitions: partitions={partitions}")]
    TaskOutOfRange { task_id: usize, partitions: usize },

    #[error(
        "round-robin partitioning requires single-fragment events: \
         seqno={seqno} fragno={fragno} last_frag={last_frag}"
    )]
    FragmentedEvent {
        seqno: i64,
        fragno: u16,
        last_frag: bool,
    },

    #[error("shard map line {line}: {message}")]
    ShardMap { line: usize, message: String },

    #[error("unknown hash method '{0}'; valid methods are string-hash or round-robin")]
    UnknownHashMethod(String),

    #[error(
        "shard '{shard}' mapped to partition {partition} but only {partitions} \
         partitions are configured"
    )]
    MappedPartitionOutOfRange {
        shard: String,
        partition: usize,
        partitions: usize,
    },

    #[error("round-robin hash method requires a channel assignment service")]
    MissingAssignmentService,

    #[error(
        "channel assignment service covers {channels} channels but the \
         partitioner has {partitions} partitions"
    )]
    ChannelCountMismatch { channels: u32, partitions: usize },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
