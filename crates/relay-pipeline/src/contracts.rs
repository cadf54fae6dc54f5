use async_trait::async_trait;

use relay_model::{EventHeader, ReplDbmsEvent, ReplEvent};

use crate::error::{ApplyError, ExtractError, FilterError};

/// Produces the next event for a stage task. Concrete source-database
/// wiring lives outside the core; stores are wired in through
/// [`QueueExtractor`](crate::adapters::QueueExtractor).
#[async_trait]
pub trait Extractor: Send {
    /// Returns the next event, or `None` when no event is currently
    /// available. Store-backed extractors suspend instead of returning
    /// `None`.
    async fn extract(&mut self) -> Result<Option<ReplEvent>, ExtractError>;

    /// Seeks to a native event id and extracts from there.
    async fn extract_from(&mut self, event_id: &str) -> Result<Option<ReplEvent>, ExtractError>;

    /// Current native position of the underlying resource.
    async fn current_resource_event_id(&self) -> Result<Option<String>, ExtractError>;

    /// Positions the extractor just after `event_id` for restart.
    fn set_last_event_id(&mut self, event_id: Option<&str>) -> Result<(), ExtractError>;

    /// True if more events are immediately available without blocking.
    async fn has_more_events(&self) -> bool;
}

/// Applies events for a stage task. Parallel appliers are told their task id
/// before the stage starts.
#[async_trait]
pub trait Applier: Send {
    fn set_task_id(&mut self, _task_id: usize) {}

    async fn apply(
        &mut self,
        event: &ReplDbmsEvent,
        do_commit: bool,
        do_rollback: bool,
        sync_log: bool,
    ) -> Result<(), ApplyError>;

    /// Records a position without applying data, e.g. for filtered events
    /// and control markers.
    async fn update_position(
        &mut self,
        header: &EventHeader,
        do_commit: bool,
        sync_log: bool,
    ) -> Result<(), ApplyError>;

    async fn commit(&mut self) -> Result<(), ApplyError>;

    async fn rollback(&mut self) -> Result<(), ApplyError>;

    /// Header of the last event this applier committed, used to resume
    /// after restart.
    async fn last_event(&mut self) -> Result<Option<EventHeader>, ApplyError>;
}

/// Transforms events inside a stage task. Returning `None` drops the event
/// from the pipeline. Filters run zero or more times per event across
/// restarts, so they must be side-effect-safe.
#[async_trait]
pub trait Filter: Send {
    async fn filter(&mut self, event: ReplDbmsEvent)
    -> Result<Option<ReplDbmsEvent>, FilterError>;
}
