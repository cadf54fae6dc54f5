use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lightweight projection of an event's position fields, used for restart
/// bookkeeping without carrying the payload. Every store and applier records
/// the last header it processed per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Global transaction sequence number, strictly non-decreasing across
    /// the pipeline.
    pub seqno: i64,
    /// Fragment index within a seqno.
    pub fragno: u16,
    /// True on the final fragment of a seqno.
    pub last_frag: bool,
    /// Originating source of the data.
    pub source_id: String,
    /// Epoch number stamped by the extractor; changes when the source
    /// restarts its native log.
    pub epoch_number: i64,
    /// Native source-system position (e.g. logfile:offset), used to resume
    /// extraction after restart.
    pub event_id: String,
    /// Logical partitioning key. `#UNKNOWN` means the event cannot be
    /// parallelized and must serialize.
    pub shard_id: String,
    /// Commit timestamp at the source.
    pub source_tstamp: DateTime<Utc>,
}

impl EventHeader {
    /// Position of this header as an ordering key.
    pub fn position(&self) -> (i64, u16) {
        (self.seqno, self.fragno)
    }

    /// True if this header sits strictly before `other` in the stream.
    pub fn is_before(&self, other: &EventHeader) -> bool {
        self.position() < other.position()
    }

    /// True if this header names the same `(seqno, fragno)` as `other`.
    /// Consumers use this to de-duplicate redelivery after a restart.
    pub fn same_position(&self, other: &EventHeader) -> bool {
        self.position() == other.position()
    }

    /// True if this is the only fragment of its transaction.
    pub fn is_unfragmented(&self) -> bool {
        self.fragno == 0 && self.last_frag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn header(seqno: i64, fragno: u16, last_frag: bool) -> EventHeader {
        EventHeader {
            seqno,
            fragno,
            last_frag,
            source_id: "db1".into(),
            epoch_number: 0,
            event_id: format!("mysql-bin.000001:{seqno}"),
            shard_id: "shop".into(),
            source_tstamp: Utc::now(),
        }
    }

    #[test]
    fn orders_by_seqno_then_fragno() {
        assert!(header(1, 0, true).is_before(&header(2, 0, true)));
        assert!(header(2, 0, false).is_before(&header(2, 1, true)));
        assert!(!header(2, 1, true).is_before(&header(2, 0, false)));
    }

    #[test]
    fn detects_duplicate_positions() {
        let a = header(5, 1, false);
        let mut b = header(5, 1, false);
        b.event_id = "mysql-bin.000002:77".into();
        assert!(a.same_position(&b));
        assert!(!a.same_position(&header(5, 2, true)));
    }

    #[test]
    fn single_fragment_is_first_and_last() {
        assert!(header(3, 0, true).is_unfragmented());
        assert!(!header(3, 0, false).is_unfragmented());
        assert!(!header(3, 1, true).is_unfragmented());
    }
}
