use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to open assignment store: {0}")]
    Open(String),

    #[error("failed to read assignment store: {0}")]
    Read(String),

    #[error("failed to write assignment store: {0}")]
    Write(String),

    #[error("failed to encode/decode assignment record: {0}")]
    Codec(String),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Store(#[from] StateError),

    #[error("channel count must be positive")]
    NoChannels,

    #[error("channel {channel} is outside the configured range of {channels} channels")]
    ChannelOutOfRange { channel: u32, channels: u32 },

    #[error("channel assignment service used before prepare")]
    NotPrepared,
}

#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("event dispatcher already running")]
    AlreadyRunning,

    #[error("event dispatcher queue closed")]
    Closed,

    #[error("notification listener failed: {0}")]
    Listener(String),
}

#[derive(Error, Debug)]
pub enum IntervalError {
    #[error("task {task_id} is outside the guard's {size} slots")]
    SlotOutOfRange { task_id: usize, size: usize },

    #[error("task {task_id} reported seqno moving backwards: previous={previous} new={new}")]
    SeqnoMovedBack {
        task_id: usize,
        previous: i64,
        new: i64,
    },

    #[error("interval guard incomplete: expected {expected} reporting tasks, have {actual}")]
    Incomplete { expected: usize, actual: usize },

    #[error("interval guard internal inconsistency: {0}")]
    Corrupt(String),
}
