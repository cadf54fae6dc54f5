use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use relay_core::{ChannelAssignmentService, EventDispatcher, Metrics, Notification};
use relay_store::{InMemoryMultiQueue, InMemoryQueue, ParallelQueueStore, Store};

use crate::adapters::{QueueApplier, QueueExtractor};
use crate::config::{PipelineConfig, StageConfig, StoreConfig, StoreKind};
use crate::error::{ConfigError, PipelineError, ProcessingError};
use crate::registry::ComponentRegistry;
use crate::stage::{Stage, TaskWiring};

/// An ordered list of stages connected by named stores, plus the services
/// they share. Owns the event dispatcher and the root cancellation token;
/// `shutdown` interrupts every stage task and the dispatcher and joins them.
pub struct Pipeline {
    name: String,
    run_id: Uuid,
    stores: HashMap<String, Arc<dyn Store>>,
    stages: Vec<Stage>,
    dispatcher: Arc<EventDispatcher>,
    channel_service: Option<Arc<ChannelAssignmentService>>,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            config: PipelineConfig::new(name),
            channel_service: None,
            registry: ComponentRegistry::with_defaults(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn store(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.get(name).cloned()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name() == name)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Prepares services and stages. Configuration problems surface here,
    /// before anything runs.
    pub async fn prepare(&self) -> Result<(), PipelineError> {
        if let Some(service) = &self.channel_service {
            service.prepare().await?;
        }
        for stage in &self.stages {
            stage.prepare()?;
        }
        Ok(())
    }

    /// Starts the dispatcher and all stages. Stages start back to front so
    /// every downstream consumer is draining before its producer begins.
    pub async fn start(&self) -> Result<(), PipelineError> {
        self.dispatcher.start().await?;
        info!(pipeline = %self.name, run_id = %self.run_id, "Starting pipeline");
        for stage in self.stages.iter().rev() {
            stage.start(
                self.dispatcher.clone(),
                self.metrics.clone(),
                self.cancel.child_token(),
            )?;
        }
        let _ = self.dispatcher.post(Notification::PipelineOnline {
            pipeline: self.name.clone(),
        });
        Ok(())
    }

    /// Cancels every stage task, joins them, then stops the dispatcher.
    /// Store contents are left intact for a potential restart; processing
    /// failures collected from the tasks are returned.
    pub async fn shutdown(&self) -> Vec<ProcessingError> {
        info!(pipeline = %self.name, "Shutting down pipeline");
        self.cancel.cancel();
        let mut failures = Vec::new();
        for stage in &self.stages {
            failures.extend(stage.shutdown().await);
        }
        let _ = self.dispatcher.post(Notification::PipelineOffline {
            pipeline: self.name.clone(),
            planned: true,
        });
        self.dispatcher.stop().await;
        failures
    }

    /// Releases stores (dropping contents) and stages.
    pub fn release(&self) -> Result<(), PipelineError> {
        for store in self.stores.values() {
            store.release();
        }
        for stage in &self.stages {
            stage.release()?;
        }
        Ok(())
    }
}

/// Assembles a pipeline from typed configuration, validating the component
/// graph up front: store references, task/partition alignment, partitioner
/// and filter tags.
pub struct PipelineBuilder {
    config: PipelineConfig,
    channel_service: Option<Arc<ChannelAssignmentService>>,
    registry: ComponentRegistry,
}

impl PipelineBuilder {
    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_channel_service(mut self, service: Arc<ChannelAssignmentService>) -> Self {
        self.channel_service = Some(service);
        self
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.stores.push(store);
        self
    }

    pub fn stage(mut self, stage: StageConfig) -> Self {
        self.config.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.config.stages.is_empty() {
            return Err(ConfigError::NoStages.into());
        }

        let mut stores: HashMap<String, (Arc<dyn Store>, StoreKind)> = HashMap::new();
        for store_config in &self.config.stores {
            if stores.contains_key(&store_config.name) {
                return Err(ConfigError::DuplicateStore(store_config.name.clone()).into());
            }
            let store = self.build_store(store_config)?;
            stores.insert(store_config.name.clone(), (store, store_config.kind));
        }

        let mut stages = Vec::new();
        for stage_config in &self.config.stages {
            stages.push(self.build_stage(stage_config, &stores)?);
        }

        Ok(Pipeline {
            name: self.config.name,
            run_id: Uuid::new_v4(),
            stores: stores
                .into_iter()
                .map(|(name, (store, _))| (name, store))
                .collect(),
            stages,
            dispatcher: Arc::new(EventDispatcher::new()),
            channel_service: self.channel_service,
            metrics: Metrics::new(),
            cancel: CancellationToken::new(),
        })
    }

    fn build_store(&self, config: &StoreConfig) -> Result<Arc<dyn Store>, ConfigError> {
        match config.kind {
            StoreKind::Queue | StoreKind::MultiQueue => {
                if config.partitioner.is_some() {
                    return Err(ConfigError::UnexpectedPartitioner {
                        store: config.name.clone(),
                        kind: config.kind.as_str().to_string(),
                    });
                }
            }
            StoreKind::ParallelQueue => {}
        }
        match config.kind {
            StoreKind::Queue => Ok(Arc::new(InMemoryQueue::new(&config.name, config.max_size)?)),
            StoreKind::MultiQueue => Ok(Arc::new(InMemoryMultiQueue::new(
                &config.name,
                config.partitions,
                config.max_size,
            )?)),
            StoreKind::ParallelQueue => {
                let spec = config.partitioner.as_ref().ok_or_else(|| {
                    ConfigError::MissingPartitioner {
                        store: config.name.clone(),
                        kind: config.kind.as_str().to_string(),
                    }
                })?;
                let partitioner = self.registry.build_partitioner(
                    spec,
                    config.partitions,
                    self.channel_service.clone(),
                )?;
                Ok(Arc::new(ParallelQueueStore::new(
                    &config.name,
                    config.partitions,
                    config.max_size,
                    partitioner,
                )?))
            }
        }
    }

    fn build_stage(
        &self,
        config: &StageConfig,
        stores: &HashMap<String, (Arc<dyn Store>, StoreKind)>,
    ) -> Result<Stage, ConfigError> {
        if config.task_count == 0 {
            return Err(ConfigError::ZeroTasks {
                stage: config.name.clone(),
            });
        }
        let (extract_store, _) =
            stores
                .get(&config.extract_from)
                .ok_or_else(|| ConfigError::UnknownStore {
                    stage: config.name.clone(),
                    store: config.extract_from.clone(),
                })?;
        let (apply_store, apply_kind) =
            stores
                .get(&config.apply_to)
                .ok_or_else(|| ConfigError::UnknownStore {
                    stage: config.name.clone(),
                    store: config.apply_to.clone(),
                })?;

        // Each task consumes its own partition of the upstream store.
        if extract_store.partitions() != config.task_count {
            return Err(ConfigError::PartitionTaskMismatch {
                stage: config.name.clone(),
                store: config.extract_from.clone(),
                tasks: config.task_count,
                partitions: extract_store.partitions(),
            });
        }
        // Downstream: a parallel store routes internally, so it only needs
        // room for every producing task; plain stores are addressed by task
        // id directly.
        let apply_ok = match apply_kind {
            StoreKind::ParallelQueue => config.task_count <= apply_store.partitions(),
            StoreKind::Queue | StoreKind::MultiQueue => {
                apply_store.partitions() == config.task_count
            }
        };
        if !apply_ok {
            return Err(ConfigError::PartitionTaskMismatch {
                stage: config.name.clone(),
                store: config.apply_to.clone(),
                tasks: config.task_count,
                partitions: apply_store.partitions(),
            });
        }

        let mut wirings = Vec::with_capacity(config.task_count);
        for task_id in 0..config.task_count {
            let mut filters = Vec::with_capacity(config.filters.len());
            for tag in &config.filters {
                filters.push(self.registry.build_filter(tag)?);
            }
            wirings.push(TaskWiring {
                extractor: Box::new(QueueExtractor::new(extract_store.clone(), task_id)),
                filters,
                applier: Box::new(QueueApplier::new(apply_store.clone(), task_id)),
                source: Some((extract_store.clone(), task_id)),
            });
        }
        Stage::new(&config.name, wirings, config.block_commit_count)
    }
}
