use serde::{Deserialize, Serialize};

use crate::event::header::EventHeader;

/// Control event kinds. Control events carry no payload; they mark a point
/// in the stream relative to the header they were created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// Consumers should stop once this marker is reached.
    Stop,
    /// Consumers should flush position up to this marker.
    Sync,
}

/// In-band control event, created internally by stores and the pipeline
/// (never by extractors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub kind: ControlKind,
    pub header: EventHeader,
}

impl ControlEvent {
    pub fn stop(header: EventHeader) -> Self {
        ControlEvent {
            kind: ControlKind::Stop,
            header,
        }
    }

    pub fn sync(header: EventHeader) -> Self {
        ControlEvent {
            kind: ControlKind::Sync,
            header,
        }
    }
}
