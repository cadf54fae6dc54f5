use async_trait::async_trait;
use std::path::Path;

use crate::error::StateError;
use crate::state::AssignmentStore;

const KEY_PREFIX: &str = "chan:";

/// Sled-backed assignment table. Every insert is flushed so assignments
/// survive a crash immediately after first use.
pub struct SledAssignmentStore {
    db: sled::Db,
}

impl SledAssignmentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db = sled::open(path).map_err(|e| StateError::Open(e.to_string()))?;
        Ok(SledAssignmentStore { db })
    }

    #[inline]
    fn key(shard_id: &str) -> String {
        format!("{KEY_PREFIX}{shard_id}")
    }
}

#[async_trait]
impl AssignmentStore for SledAssignmentStore {
    async fn load_all(&self) -> Result<Vec<(String, u32)>, StateError> {
        let mut rows = Vec::new();
        for item in self.db.scan_prefix(KEY_PREFIX) {
            let (key, value) = item.map_err(|e| StateError::Read(e.to_string()))?;
            let key = std::str::from_utf8(&key)
                .map_err(|e| StateError::Codec(e.to_string()))?
                .trim_start_matches(KEY_PREFIX)
                .to_string();
            let channel: u32 =
                bincode::deserialize(&value).map_err(|e| StateError::Codec(e.to_string()))?;
            rows.push((key, channel));
        }
        Ok(rows)
    }

    async fn insert(&self, shard_id: &str, channel: u32) -> Result<(), StateError> {
        let value = bincode::serialize(&channel).map_err(|e| StateError::Codec(e.to_string()))?;
        self.db
            .insert(Self::key(shard_id), value)
            .map_err(|e| StateError::Write(e.to_string()))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn assignments_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = SledAssignmentStore::open(dir.path()).unwrap();
            store.insert("shop", 2).await.unwrap();
            store.insert("billing", 0).await.unwrap();
            // Replace-on-insert semantics.
            store.insert("shop", 1).await.unwrap();
        }

        let store = SledAssignmentStore::open(dir.path()).unwrap();
        let mut rows = store.load_all().await.unwrap();
        rows.sort();
        assert_eq!(rows, vec![("billing".to_string(), 0), ("shop".to_string(), 1)]);
    }
}
