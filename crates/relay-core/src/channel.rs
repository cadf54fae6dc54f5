use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use relay_model::StatusReport;

use crate::error::ChannelError;
use crate::state::AssignmentStore;

#[derive(Default)]
struct AssignmentState {
    assignments: HashMap<String, u32>,
    next_channel: u32,
    prepared: bool,
}

/// Durable shard-to-channel assignment service for parallel apply. A shard
/// keeps its channel across restarts; new shards are assigned round-robin
/// over the configured channel count, persisted before they are cached so
/// concurrent first use can never hand out two different channels for the
/// same shard.
pub struct ChannelAssignmentService {
    name: String,
    channels: u32,
    store: Arc<dyn AssignmentStore>,
    state: Mutex<AssignmentState>,
    access_failures: AtomicU64,
}

impl ChannelAssignmentService {
    pub fn new(
        name: impl Into<String>,
        channels: u32,
        store: Arc<dyn AssignmentStore>,
    ) -> Result<Self, ChannelError> {
        if channels == 0 {
            return Err(ChannelError::NoChannels);
        }
        Ok(ChannelAssignmentService {
            name: name.into(),
            channels,
            store,
            state: Mutex::new(AssignmentState::default()),
            access_failures: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Loads all existing assignments into memory. Must run before lookups
    /// so a restart reproduces prior assignments exactly.
    pub async fn prepare(&self) -> Result<(), ChannelError> {
        let rows = self.store.load_all().await?;
        let mut state = self.state.lock().await;
        state.assignments = rows.into_iter().collect();
        state.next_channel = 0;
        state.prepared = true;
        info!(
            service = %self.name,
            assignments = state.assignments.len(),
            "Loaded channel assignments"
        );
        Ok(())
    }

    /// Looks up the channel for a shard, creating and persisting a new
    /// assignment on first reference.
    pub async fn channel_for(&self, shard_id: &str) -> Result<u32, ChannelError> {
        let mut state = self.state.lock().await;
        if !state.prepared {
            return Err(ChannelError::NotPrepared);
        }
        if let Some(&channel) = state.assignments.get(shard_id) {
            return Ok(channel);
        }

        // Roll the round-robin cursor over if necessary.
        if state.next_channel >= self.channels {
            state.next_channel = 0;
        }
        let channel = state.next_channel;
        state.next_channel += 1;

        // Persist first, cache second; both under the same lock.
        self.store.insert(shard_id, channel).await?;
        state.assignments.insert(shard_id.to_string(), channel);
        debug!(service = %self.name, shard_id, channel, "Created channel assignment");
        Ok(channel)
    }

    /// Inserts an explicit shard/channel assignment.
    pub async fn insert_assignment(&self, shard_id: &str, channel: u32) -> Result<(), ChannelError> {
        if channel >= self.channels {
            return Err(ChannelError::ChannelOutOfRange {
                channel,
                channels: self.channels,
            });
        }
        let mut state = self.state.lock().await;
        self.store.insert(shard_id, channel).await?;
        state.assignments.insert(shard_id.to_string(), channel);
        Ok(())
    }

    /// Lists assignments from the durable table, sorted by shard id. Access
    /// failures are counted and degrade to an empty list so status reporting
    /// stays available when the backing store flakes.
    pub async fn list_assignments(&self) -> Vec<(String, u32)> {
        match self.store.load_all().await {
            Ok(mut rows) => {
                rows.sort();
                rows
            }
            Err(e) => {
                self.access_failures.fetch_add(1, Ordering::Relaxed);
                debug!(service = %self.name, error = %e, "Assignment table access failed");
                Vec::new()
            }
        }
    }

    pub async fn status(&self) -> StatusReport {
        let state = self.state.lock().await;
        let mut status = StatusReport::new();
        status
            .set("name", &self.name)
            .set("totalAssignments", state.assignments.len())
            .set("channels", self.channels)
            .set("accessFailures", self.access_failures.load(Ordering::Relaxed));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::state::sled_store::SledAssignmentStore;
    use async_trait::async_trait;
    use tempfile::tempdir;

    #[tokio::test]
    async fn assigns_round_robin_and_reuses_cached_channels() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SledAssignmentStore::open(dir.path()).unwrap());
        let service = ChannelAssignmentService::new("channel-assignment", 3, store).unwrap();
        service.prepare().await.unwrap();

        assert_eq!(service.channel_for("s1").await.unwrap(), 0);
        assert_eq!(service.channel_for("s2").await.unwrap(), 1);
        assert_eq!(service.channel_for("s3").await.unwrap(), 2);
        // Cursor wraps; existing shards keep their channel.
        assert_eq!(service.channel_for("s4").await.unwrap(), 0);
        assert_eq!(service.channel_for("s2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn assignments_survive_service_restart() {
        let dir = tempdir().unwrap();
        let channel = {
            let store = Arc::new(SledAssignmentStore::open(dir.path()).unwrap());
            let service = ChannelAssignmentService::new("channel-assignment", 4, store).unwrap();
            service.prepare().await.unwrap();
            service.channel_for("s1").await.unwrap()
        };

        let store = Arc::new(SledAssignmentStore::open(dir.path()).unwrap());
        let service = ChannelAssignmentService::new("channel-assignment", 4, store).unwrap();
        service.prepare().await.unwrap();
        assert_eq!(service.channel_for("s1").await.unwrap(), channel);
        // No duplicate row was created.
        assert_eq!(service.list_assignments().await.len(), 1);
    }

    #[tokio::test]
    async fn lookups_before_prepare_fail_fast() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SledAssignmentStore::open(dir.path()).unwrap());
        let service = ChannelAssignmentService::new("channel-assignment", 2, store).unwrap();
        assert!(matches!(
            service.channel_for("s1").await,
            Err(ChannelError::NotPrepared)
        ));
    }

    struct FlakyStore;

    #[async_trait]
    impl AssignmentStore for FlakyStore {
        async fn load_all(&self) -> Result<Vec<(String, u32)>, StateError> {
            Err(StateError::Read("connection reset".into()))
        }

        async fn insert(&self, _shard_id: &str, _channel: u32) -> Result<(), StateError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn listing_degrades_to_empty_and_counts_failures() {
        let service =
            ChannelAssignmentService::new("channel-assignment", 2, Arc::new(FlakyStore)).unwrap();
        assert!(service.list_assignments().await.is_empty());
        assert!(service.list_assignments().await.is_empty());
        let status = service.status().await;
        assert_eq!(status.get("accessFailures"), Some("2"));
    }

    #[tokio::test]
    async fn explicit_insert_validates_channel_range() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SledAssignmentStore::open(dir.path()).unwrap());
        let service = ChannelAssignmentService::new("channel-assignment", 2, store).unwrap();
        service.prepare().await.unwrap();

        service.insert_assignment("s9", 1).await.unwrap();
        assert_eq!(service.channel_for("s9").await.unwrap(), 1);
        assert!(matches!(
            service.insert_assignment("s10", 5).await,
            Err(ChannelError::ChannelOutOfRange { .. })
        ));
    }
}
