pub mod adapters;
pub mod config;
pub mod contracts;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod stage;
mod task;

pub use adapters::{QueueApplier, QueueExtractor};
pub use config::{
    PartitionerSpec, PipelineConfig, StageConfig, StoreConfig, StoreKind,
};
pub use contracts::{Applier, Extractor, Filter};
pub use error::{ApplyError, ConfigError, ExtractError, FilterError, PipelineError, ProcessingError};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use progress::{StageProgressTracker, TaskProgress};
pub use registry::ComponentRegistry;
pub use stage::{Stage, StageState, TaskWiring};
