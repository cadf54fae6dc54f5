pub mod control;
pub mod data;
pub mod header;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::control::ControlEvent;
use crate::event::data::DbmsData;
use crate::event::header::EventHeader;

/// One logical change extracted from the source transaction log. Immutable
/// once created: header fields are fixed at construction and only metadata
/// annotations may be added afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplDbmsEvent {
    header: EventHeader,
    data: Vec<DbmsData>,
    /// Application-specific annotations (e.g. heartbeat tagging), in
    /// insertion order.
    metadata: Vec<(String, String)>,
}

impl ReplDbmsEvent {
    pub fn new(header: EventHeader, data: Vec<DbmsData>) -> Self {
        ReplDbmsEvent {
            header,
            data,
            metadata: Vec::new(),
        }
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn seqno(&self) -> i64 {
        self.header.seqno
    }

    pub fn fragno(&self) -> u16 {
        self.header.fragno
    }

    pub fn last_frag(&self) -> bool {
        self.header.last_frag
    }

    pub fn shard_id(&self) -> &str {
        &self.header.shard_id
    }

    pub fn event_id(&self) -> &str {
        &self.header.event_id
    }

    pub fn source_tstamp(&self) -> DateTime<Utc> {
        self.header.source_tstamp
    }

    pub fn data(&self) -> &[DbmsData] {
        &self.data
    }

    /// Adds or replaces a metadata annotation.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.into(),
            None => self.metadata.push((key, value.into())),
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Any event flowing between pipeline stages: a real data event or an
/// in-band control marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplEvent {
    Dbms(ReplDbmsEvent),
    Control(ControlEvent),
}

impl ReplEvent {
    pub fn header(&self) -> &EventHeader {
        match self {
            ReplEvent::Dbms(event) => event.header(),
            ReplEvent::Control(event) => &event.header,
        }
    }

    pub fn seqno(&self) -> i64 {
        self.header().seqno
    }

    pub fn is_control(&self) -> bool {
        matches!(self, ReplEvent::Control(_))
    }
}

impl From<ReplDbmsEvent> for ReplEvent {
    fn from(event: ReplDbmsEvent) -> Self {
        ReplEvent::Dbms(event)
    }
}

impl From<ControlEvent> for ReplEvent {
    fn from(event: ControlEvent) -> Self {
        ReplEvent::Control(event)
    }
}
