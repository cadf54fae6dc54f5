use async_trait::async_trait;

use crate::error::StateError;

pub mod sled_store;

/// Durable backend for the shard-to-channel assignment table: two columns,
/// shard id (primary key) and channel number, replace-on-insert, loaded
/// wholesale at prepare.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(String, u32)>, StateError>;
    async fn insert(&self, shard_id: &str, channel: u32) -> Result<(), StateError>;
}
