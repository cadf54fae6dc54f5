#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::{Arc, Mutex};

use relay_core::error::DispatchError;
use relay_core::{Notification, NotificationListener};
use relay_model::{DbmsData, EventHeader, ReplDbmsEvent, ReplEvent};


static TRACING: std::sync::Once = std::sync::Once::new();

/// Installs a test subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Well-formed header for test events. Source time defaults to seqno
/// seconds past a fixed epoch so interval math is predictable.
pub fn test_header(seqno: i64, shard_id: &str) -> EventHeader {
    EventHeader {
        seqno,
        fragno: 0,
        last_frag: true,
        source_id: "db1".into(),
        epoch_number: 0,
        event_id: format!("mysql-bin.000001:{}", 1000 + seqno),
        shard_id: shard_id.into(),
        source_tstamp: Utc.timestamp_millis_opt(1_600_000_000_000 + seqno * 1000).unwrap(),
    }
}

/// Well-formed single-statement event.
pub fn test_event(seqno: i64, shard_id: &str) -> ReplEvent {
    ReplDbmsEvent::new(
        test_header(seqno, shard_id),
        vec![DbmsData::statement(format!("INSERT INTO t VALUES ({seqno})"))],
    )
    .into()
}

/// Listener that records every notification it sees.
pub struct RecordingListener {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingListener {
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationListener for RecordingListener {
    async fn on_notification(&self, notification: &Notification) -> Result<(), DispatchError> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
