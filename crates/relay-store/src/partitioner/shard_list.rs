use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use relay_core::ChannelAssignmentService;
use relay_model::{EventHeader, SHARD_ID_UNKNOWN, hash_partition};

use crate::error::PartitionError;
use crate::partitioner::{Partitioner, PartitionerResponse, check_task};

/// How shards without an explicit mapping are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAssignment {
    /// All unmapped shards land on one fixed partition.
    Fixed(usize),
    /// Unmapped shards are hashed per the configured hash method.
    Hash,
}

/// Hashing method for unmapped shards when the default is `Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    /// Stable string hash of the shard name.
    StringHash,
    /// Persistent round-robin through the channel assignment service, so an
    /// unmapped shard keeps its channel across restarts.
    RoundRobin,
}

/// Parsed form of a shard map file:
///
/// ```text
/// # Explicit assignments.
/// common1=0
/// db1=1
///
/// # Default for unmatched shards: a partition number, or -1 to hash.
/// (*)=-1
///
/// # Shards that must run in a critical section.
/// (critical)=common1,common2
///
/// # string-hash or round-robin
/// (hash-method)=string-hash
/// ```
#[derive(Debug, Clone)]
pub struct ShardMapConfig {
    pub explicit: HashMap<String, usize>,
    pub default: DefaultAssignment,
    pub critical: HashSet<String>,
    pub hash_method: HashMethod,
}

impl Default for ShardMapConfig {
    fn default() -> Self {
        ShardMapConfig {
            explicit: HashMap::new(),
            default: DefaultAssignment::Hash,
            critical: HashSet::new(),
            hash_method: HashMethod::StringHash,
        }
    }
}

impl ShardMapConfig {
    /// Parses the property-file format above. Shard names are
    /// case-sensitive as loaded.
    pub fn parse(text: &str) -> Result<Self, PartitionError> {
        let mut config = ShardMapConfig::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, value) = trimmed.split_once('=').ok_or(PartitionError::ShardMap {
                line,
                message: format!("expected name=value, got '{trimmed}'"),
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "(*)" => {
                    let number: i64 = value.parse().map_err(|_| PartitionError::ShardMap {
                        line,
                        message: format!("default partition must be a number or -1, got '{value}'"),
                    })?;
                    config.default = if number < 0 {
                        DefaultAssignment::Hash
                    } else {
                        DefaultAssignment::Fixed(number as usize)
                    };
                }
                "(critical)" => {
                    for shard in value.split(',') {
                        let shard = shard.trim();
                        if !shard.is_empty() {
                            config.critical.insert(shard.to_string());
                        }
                    }
                }
                "(hash-method)" => {
                    config.hash_method = match value {
                        "string-hash" => HashMethod::StringHash,
                        "round-robin" => HashMethod::RoundRobin,
                        other => return Err(PartitionError::UnknownHashMethod(other.to_string())),
                    };
                }
                shard => {
                    let partition: usize =
                        value.parse().map_err(|_| PartitionError::ShardMap {
                            line,
                            message: format!(
                                "partition for shard '{shard}' must be a number, got '{value}'"
                            ),
                        })?;
                    config.explicit.insert(shard.to_string(), partition);
                }
            }
        }

        Ok(config)
    }
}

/// Partitions events using an explicit shard-to-partition map with a
/// wildcard default and a critical-shard list. The unknown shard is always
/// critical regardless of the loaded list.
pub struct ShardListPartitioner {
    partitions: usize,
    /// Explicit assignments plus round-robin results cached on first use.
    shard_table: Mutex<HashMap<String, usize>>,
    default: DefaultAssignment,
    critical: HashSet<String>,
    hash_method: HashMethod,
    assignment_service: Option<Arc<ChannelAssignmentService>>,
}

impl ShardListPartitioner {
    pub fn new(
        partitions: usize,
        config: ShardMapConfig,
        assignment_service: Option<Arc<ChannelAssignmentService>>,
    ) -> Result<Self, PartitionError> {
        if partitions == 0 {
            return Err(PartitionError::NoPartitions);
        }
        for (shard, &partition) in &config.explicit {
            if partition >= partitions {
                return Err(PartitionError::MappedPartitionOutOfRange {
                    shard: shard.clone(),
                    partition,
                    partitions,
                });
            }
        }
        if let DefaultAssignment::Fixed(partition) = config.default {
            if partition >= partitions {
                return Err(PartitionError::MappedPartitionOutOfRange {
                    shard: "(*)".to_string(),
                    partition,
                    partitions,
                });
            }
        }
        if config.hash_method == HashMethod::RoundRobin {
            match &assignment_service {
                None => return Err(PartitionError::MissingAssignmentService),
                Some(service) if service.channels() as usize != partitions => {
                    return Err(PartitionError::ChannelCountMismatch {
                        channels: service.channels(),
                        partitions,
                    });
                }
                Some(_) => {}
            }
        }

        let mut critical = config.critical;
        // The unknown shard must be critical or it will not be processed
        // correctly.
        critical.insert(SHARD_ID_UNKNOWN.to_string());

        info!(
            explicit = config.explicit.len(),
            critical = critical.len(),
            "Loaded shard partitioning data"
        );

        Ok(ShardListPartitioner {
            partitions,
            shard_table: Mutex::new(config.explicit),
            default: config.default,
            critical,
            hash_method: config.hash_method,
            assignment_service,
        })
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.shard_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Partitioner for ShardListPartitioner {
    fn partitions(&self) -> usize {
        self.partitions
    }

    async fn partition(
        &self,
        header: &EventHeader,
        task_id: usize,
    ) -> Result<PartitionerResponse, PartitionError> {
        check_task(task_id, self.partitions)?;
        let shard_id = header.shard_id.as_str();
        let critical = self.critical.contains(shard_id);

        if let Some(&partition) = self.lock_table().get(shard_id) {
            return Ok(PartitionerResponse { partition, critical });
        }

        let partition = match (self.default, self.hash_method) {
            (DefaultAssignment::Fixed(partition), _) => partition,
            (DefaultAssignment::Hash, HashMethod::StringHash) => {
                hash_partition(shard_id, self.partitions)
            }
            (DefaultAssignment::Hash, HashMethod::RoundRobin) => {
                let service = self
                    .assignment_service
                    .as_ref()
                    .ok_or(PartitionError::MissingAssignmentService)?;
                let channel = service.channel_for(shard_id).await? as usize;
                debug!(shard_id, channel, "Cached round-robin shard assignment");
                // Cache locally; the service is idempotent, so a racing
                // first use resolves to the same channel.
                self.lock_table().insert(shard_id.to_string(), channel);
                channel
            }
        };

        Ok(PartitionerResponse { partition, critical })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::state::sled_store::SledAssignmentStore;
    use tempfile::tempdir;

    fn header(shard: &str) -> EventHeader {
        EventHeader {
            seqno: 1,
            fragno: 0,
            last_frag: true,
            source_id: "db1".into(),
            epoch_number: 0,
            event_id: "log:1".into(),
            shard_id: shard.into(),
            source_tstamp: Utc::now(),
        }
    }

    const SHARD_MAP: &str = "\
# Shard map file.
common1=0
common2=0
db1=1
db2=2

(*)=-1
(critical)=common1,common2
(hash-method)=string-hash
";

    #[test]
    fn parses_the_documented_format() {
        let config = ShardMapConfig::parse(SHARD_MAP).unwrap();
        assert_eq!(config.explicit.len(), 4);
        assert_eq!(config.explicit["db2"], 2);
        assert_eq!(config.default, DefaultAssignment::Hash);
        assert!(config.critical.contains("common1"));
        assert_eq!(config.hash_method, HashMethod::StringHash);
    }

    #[test]
    fn rejects_malformed_lines_and_unknown_methods() {
        assert!(matches!(
            ShardMapConfig::parse("db1"),
            Err(PartitionError::ShardMap { line: 1, .. })
        ));
        assert!(matches!(
            ShardMapConfig::parse("db1=x"),
            Err(PartitionError::ShardMap { .. })
        ));
        assert!(matches!(
            ShardMapConfig::parse("(hash-method)=md5"),
            Err(PartitionError::UnknownHashMethod(_))
        ));
    }

    #[tokio::test]
    async fn explicit_entries_and_critical_list_are_honored() {
        let config = ShardMapConfig::parse(SHARD_MAP).unwrap();
        let p = ShardListPartitioner::new(4, config, None).unwrap();

        let common = p.partition(&header("common1"), 0).await.unwrap();
        assert_eq!(common.partition, 0);
        assert!(common.critical);

        let db2 = p.partition(&header("db2"), 0).await.unwrap();
        assert_eq!(db2.partition, 2);
        assert!(!db2.critical);

        // Unmapped shard falls back to the stable hash; repeated lookups
        // agree.
        let other = p.partition(&header("analytics"), 0).await.unwrap();
        assert_eq!(
            other.partition,
            hash_partition("analytics", 4),
        );
        assert_eq!(
            p.partition(&header("analytics"), 0).await.unwrap(),
            other
        );
    }

    #[tokio::test]
    async fn unknown_shard_is_always_critical() {
        let p = ShardListPartitioner::new(4, ShardMapConfig::default(), None).unwrap();
        let response = p.partition(&header(SHARD_ID_UNKNOWN), 0).await.unwrap();
        assert!(response.critical);
    }

    #[tokio::test]
    async fn fixed_default_routes_unmapped_shards() {
        let config = ShardMapConfig::parse("db1=0\n(*)=3\n").unwrap();
        let p = ShardListPartitioner::new(4, config, None).unwrap();
        assert_eq!(
            p.partition(&header("whatever"), 0).await.unwrap().partition,
            3
        );
    }

    #[tokio::test]
    async fn out_of_range_mappings_fail_at_construction() {
        let config = ShardMapConfig::parse("db1=9\n").unwrap();
        assert!(matches!(
            ShardListPartitioner::new(4, config, None),
            Err(PartitionError::MappedPartitionOutOfRange { .. })
        ));

        let config = ShardMapConfig::parse("(*)=7\n").unwrap();
        assert!(ShardListPartitioner::new(4, config, None).is_err());
    }

    #[tokio::test]
    async fn round_robin_method_requires_and_uses_the_assignment_service() {
        let config = ShardMapConfig::parse("(hash-method)=round-robin\n").unwrap();
        assert!(matches!(
            ShardListPartitioner::new(4, config.clone(), None),
            Err(PartitionError::MissingAssignmentService)
        ));

        let dir = tempdir().unwrap();
        let store = Arc::new(SledAssignmentStore::open(dir.path()).unwrap());
        let service =
            Arc::new(ChannelAssignmentService::new("channel-assignment", 4, store).unwrap());
        service.prepare().await.unwrap();

        let p = ShardListPartitioner::new(4, config, Some(service.clone())).unwrap();
        let first = p.partition(&header("s1"), 0).await.unwrap().partition;
        let second = p.partition(&header("s2"), 0).await.unwrap().partition;
        assert_ne!(first, second);
        // Same shard resolves to the cached channel.
        assert_eq!(p.partition(&header("s1"), 0).await.unwrap().partition, first);
        // And the assignment is durable in the service.
        assert_eq!(service.channel_for("s1").await.unwrap() as usize, first);
    }
}
