/// Typed pipeline configuration. Components are assembled from these
/// structs by [`PipelineBuilder`](crate::pipeline::PipelineBuilder) with
/// compile-time-checked field binding; pluggable seams (partitioners,
/// filters) go through the [`ComponentRegistry`](crate::registry::ComponentRegistry)
/// by tag.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Single bounded FIFO.
    Queue,
    /// N independent FIFOs addressed by the producer.
    MultiQueue,
    /// N FIFOs behind an internal partitioner with critical-event drain.
    ParallelQueue,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Queue => "queue",
            StoreKind::MultiQueue => "multi-queue",
            StoreKind::ParallelQueue => "parallel-queue",
        }
    }
}

/// Partitioner selection for a parallel queue store.
#[derive(Debug, Clone)]
pub struct PartitionerSpec {
    /// Registry tag: "hash", "round-robin", "shard-list", or a custom
    /// registration.
    pub kind: String,
    /// Shard map text for the shard-list partitioner.
    pub shard_map: Option<String>,
}

impl PartitionerSpec {
    pub fn hash() -> Self {
        PartitionerSpec {
            kind: "hash".into(),
            shard_map: None,
        }
    }

    pub fn round_robin() -> Self {
        PartitionerSpec {
            kind: "round-robin".into(),
            shard_map: None,
        }
    }

    pub fn shard_list(map_text: impl Into<String>) -> Self {
        PartitionerSpec {
            kind: "shard-list".into(),
            shard_map: Some(map_text.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub name: String,
    pub kind: StoreKind,
    pub partitions: usize,
    pub max_size: usize,
    pub partitioner: Option<PartitionerSpec>,
}

impl StoreConfig {
    pub fn queue(name: impl Into<String>, max_size: usize) -> Self {
        StoreConfig {
            name: name.into(),
            kind: StoreKind::Queue,
            partitions: 1,
            max_size,
            partitioner: None,
        }
    }

    pub fn multi_queue(name: impl Into<String>, partitions: usize, max_size: usize) -> Self {
        StoreConfig {
            name: name.into(),
            kind: StoreKind::MultiQueue,
            partitions,
            max_size,
            partitioner: None,
        }
    }

    pub fn parallel_queue(
        name: impl Into<String>,
        partitions: usize,
        max_size: usize,
        partitioner: PartitionerSpec,
    ) -> Self {
        StoreConfig {
            name: name.into(),
            kind: StoreKind::ParallelQueue,
            partitions,
            max_size,
            partitioner: Some(partitioner),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageConfig {
    pub name: String,
    pub task_count: usize,
    /// Store the stage extracts from.
    pub extract_from: String,
    /// Store the stage applies into.
    pub apply_to: String,
    /// Filter registry tags, applied in order in every task.
    pub filters: Vec<String>,
    /// Commit every N transactions (always commits when the extractor has
    /// nothing further queued).
    pub block_commit_count: u64,
}

impl StageConfig {
    pub fn new(
        name: impl Into<String>,
        task_count: usize,
        extract_from: impl Into<String>,
        apply_to: impl Into<String>,
    ) -> Self {
        StageConfig {
            name: name.into(),
            task_count,
            extract_from: extract_from.into(),
            apply_to: apply_to.into(),
            filters: Vec::new(),
            block_commit_count: 1,
        }
    }

    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_block_commit(mut self, count: u64) -> Self {
        self.block_commit_count = count;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub stores: Vec<StoreConfig>,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        PipelineConfig {
            name: name.into(),
            stores: Vec::new(),
            stages: Vec::new(),
        }
    }
}
