use std::collections::HashMap;
use std::sync::Arc;

use relay_core::ChannelAssignmentService;
use relay_store::partitioner::{
    HashPartitioner, Partitioner, RoundRobinPartitioner, ShardListPartitioner, ShardMapConfig,
};

use crate::config::PartitionerSpec;
use crate::contracts::Filter;
use crate::error::ConfigError;

pub type PartitionerFactory = Arc<
    dyn Fn(
            usize,
            &PartitionerSpec,
            Option<Arc<ChannelAssignmentService>>,
        ) -> Result<Arc<dyn Partitioner>, ConfigError>
        + Send
        + Sync,
>;

pub type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

/// Maps configuration tags to component constructors. This is the pluggable
/// seam for partitioners and filters: external code registers a factory
/// under a tag and configuration refers to the tag, with no runtime
/// reflection involved.
#[derive(Clone)]
pub struct ComponentRegistry {
    partitioners: HashMap<String, PartitionerFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            partitioners: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    /// Registry with the built-in partitioners: "hash", "round-robin",
    /// "shard-list".
    pub fn with_defaults() -> Self {
        let mut registry = ComponentRegistry::new();
        registry.register_partitioner("hash", |partitions, _spec, _service| {
            Ok(Arc::new(HashPartitioner::new(partitions)?) as Arc<dyn Partitioner>)
        });
        registry.register_partitioner("round-robin", |partitions, _spec, _service| {
            Ok(Arc::new(RoundRobinPartitioner::new(partitions)?) as Arc<dyn Partitioner>)
        });
        registry.register_partitioner("shard-list", |partitions, spec, service| {
            let config = match &spec.shard_map {
                Some(text) => ShardMapConfig::parse(text)?,
                None => ShardMapConfig::default(),
            };
            Ok(Arc::new(ShardListPartitioner::new(partitions, config, service)?)
                as Arc<dyn Partitioner>)
        });
        registry
    }

    pub fn register_partitioner<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(
                usize,
                &PartitionerSpec,
                Option<Arc<ChannelAssignmentService>>,
            ) -> Result<Arc<dyn Partitioner>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.partitioners.insert(tag.into(), Arc::new(factory));
    }

    pub fn register_filter<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.insert(tag.into(), Arc::new(factory));
    }

    pub fn build_partitioner(
        &self,
        spec: &PartitionerSpec,
        partitions: usize,
        service: Option<Arc<ChannelAssignmentService>>,
    ) -> Result<Arc<dyn Partitioner>, ConfigError> {
        let factory = self
            .partitioners
            .get(&spec.kind)
            .ok_or_else(|| ConfigError::UnknownPartitioner(spec.kind.clone()))?;
        factory(partitions, spec, service)
    }

    pub fn build_filter(&self, tag: &str) -> Result<Box<dyn Filter>, ConfigError> {
        let factory = self
            .filters
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownFilter(tag.to_string()))?;
        Ok(factory())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        ComponentRegistry::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_builtin_partitioners() {
        let registry = ComponentRegistry::with_defaults();
        for spec in [
            PartitionerSpec::hash(),
            PartitionerSpec::round_robin(),
            PartitionerSpec::shard_list("db1=0\n"),
        ] {
            let partitioner = registry.build_partitioner(&spec, 2, None).unwrap();
            assert_eq!(partitioner.partitions(), 2);
        }
    }

    #[test]
    fn unknown_tags_fail_fast() {
        let registry = ComponentRegistry::with_defaults();
        let spec = PartitionerSpec {
            kind: "consistent-ring".into(),
            shard_map: None,
        };
        assert!(matches!(
            registry.build_partitioner(&spec, 2, None),
            Err(ConfigError::UnknownPartitioner(_))
        ));
        assert!(matches!(
            registry.build_filter("heartbeat"),
            Err(ConfigError::UnknownFilter(_))
        ));
    }
}
