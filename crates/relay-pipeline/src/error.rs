use relay_core::error::{ChannelError, DispatchError, IntervalError};
use relay_store::{PartitionError, StoreError};
use thiserror::Error;

use crate::stage::StageState;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("extraction failed: {0}")]
    Source(String),

    #[error("extractor does not support seeking: {0}")]
    SeekUnsupported(String),
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("apply failed: {0}")]
    Target(String),

    #[error("commit failed: {0}")]
    Commit(String),
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("filter failed: {0}")]
    Failed(String),
}

/// A filter or applier failure, wrapped with the coordinates of the event
/// being processed so external recovery policy can act on it.
#[derive(Error, Debug)]
#[error("processing failed at seqno {seqno} (event id '{event_id}'): {source}")]
pub struct ProcessingError {
    pub seqno: i64,
    pub event_id: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("pipeline has no stages")]
    NoStages,

    #[error("stage '{stage}' task count may not be less than 1")]
    ZeroTasks { stage: String },

    #[error("duplicate store name '{0}'")]
    DuplicateStore(String),

    #[error("stage '{stage}' references unknown store '{store}'")]
    UnknownStore { stage: String, store: String },

    #[error(
        "stage '{stage}' runs {tasks} tasks but store '{store}' has \
         {partitions} partitions"
    )]
    PartitionTaskMismatch {
        stage: String,
        store: String,
        tasks: usize,
        partitions: usize,
    },

    #[error("store '{store}' of kind {kind} does not take a partitioner")]
    UnexpectedPartitioner { store: String, kind: String },

    #[error("store '{store}' of kind {kind} requires a partitioner")]
    MissingPartitioner { store: String, kind: String },

    #[error("unknown partitioner type '{0}'")]
    UnknownPartitioner(String),

    #[error("unknown filter type '{0}'")]
    UnknownFilter(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{component} is in state {actual:?}; expected {expected:?}")]
    InvalidState {
        component: String,
        expected: StageState,
        actual: StageState,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Progress(#[from] IntervalError),
}
