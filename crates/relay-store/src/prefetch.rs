use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use relay_model::{EventHeader, ReplDbmsEvent, ReplEvent, StatusReport};

use crate::error::StoreError;
use crate::queue::BoundedQueue;
use crate::store::{Store, check_partition};

/// Polls the downstream system's current applied position. The prefetch
/// queue uses it to decide which events are already consumed and how far
/// ahead of the downstream it is allowed to run.
#[async_trait]
pub trait CommitPositionProbe: Send + Sync {
    async fn fetch_position(&self) -> Result<Option<EventHeader>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Minimum time between downstream position probes.
    pub check_interval: Duration,
    /// Maximum source-time distance an event may run ahead of the
    /// downstream's applied position before the producer is held back.
    pub ahead_max_time: Duration,
    /// How long to park the producer between re-checks while held back.
    pub sleep_time: Duration,
    /// Offset added to the first probed position so a cold downstream still
    /// warms the cache with a batch of upcoming events.
    pub warm_up_event_count: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            check_interval: Duration::from_millis(1000),
            ahead_max_time: Duration::from_millis(3000),
            sleep_time: Duration::from_millis(500),
            warm_up_event_count: 100,
        }
    }
}

#[derive(Default)]
struct PrefetchState {
    last_checked: Option<Instant>,
    /// Downstream applied seqno; -1 until the first probe.
    downstream_seqno: Option<i64>,
    /// Source time (ms) of the newest event known applied downstream.
    init_time_ms: Option<i64>,
    /// Source times of events seen, keyed by seqno, pruned as the
    /// downstream advances.
    seen_times: BTreeMap<i64, i64>,
}

/// Specialized store for a prefetch/cache-warming replicator running ahead
/// of a real applier. Events the downstream has already applied are dropped;
/// events too far ahead of the downstream's applied source time hold the
/// producer until the gap narrows. Restart coordinates come from the
/// downstream itself, so `last_header` reports the probed position and
/// headers recorded by downstream stages are ignored.
pub struct PrefetchQueue {
    name: String,
    queue: BoundedQueue<ReplEvent>,
    probe: std::sync::Arc<dyn CommitPositionProbe>,
    config: PrefetchConfig,
    state: Mutex<PrefetchState>,
    downstream_header: StdMutex<Option<EventHeader>>,
    total_events: AtomicU64,
    prefetch_events: AtomicU64,
    sleeping: AtomicBool,
    sleep_time_ms: AtomicU64,
}

impl PrefetchQueue {
    pub fn new(
        name: impl Into<String>,
        max_size: usize,
        probe: std::sync::Arc<dyn CommitPositionProbe>,
        config: PrefetchConfig,
    ) -> Result<Self, StoreError> {
        if max_size == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(PrefetchQueue {
            name: name.into(),
            queue: BoundedQueue::new(max_size),
            probe,
            config,
            state: Mutex::new(PrefetchState::default()),
            downstream_header: StdMutex::new(None),
            total_events: AtomicU64::new(0),
            prefetch_events: AtomicU64::new(0),
            sleeping: AtomicBool::new(false),
            sleep_time_ms: AtomicU64::new(0),
        })
    }

    /// Decides whether an event is worth prefetching. Returns false when the
    /// event is already applied downstream; holds the caller while the event
    /// is too far ahead.
    async fn filter(&self, event: &ReplDbmsEvent) -> Result<bool, StoreError> {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let seqno = event.seqno();
        let source_ms = event.source_tstamp().timestamp_millis();

        let mut state = self.state.lock().await;
        state.seen_times.insert(seqno, source_ms);

        let check_due = match state.last_checked {
            None => true,
            Some(at) => at.elapsed() >= self.config.check_interval,
        };
        if check_due {
            self.check_downstream(&mut state).await?;
        }
        if state.init_time_ms.is_none() {
            state.init_time_ms = Some(source_ms);
        }

        if let Some(downstream) = state.downstream_seqno {
            if seqno <= downstream {
                debug!(store = %self.name, seqno, "Discarding event already applied downstream");
                return Ok(false);
            }
        }

        let ahead_max_ms = self.config.ahead_max_time.as_millis() as i64;
        while source_ms - state.init_time_ms.unwrap_or(source_ms) > ahead_max_ms {
            debug!(store = %self.name, seqno, "Event too far ahead of downstream; holding producer");
            self.sleeping.store(true, Ordering::Relaxed);
            let parked = Instant::now();
            drop(state);
            tokio::time::sleep(self.config.sleep_time).await;
            self.sleep_time_ms
                .fetch_add(parked.elapsed().as_millis() as u64, Ordering::Relaxed);
            self.sleeping.store(false, Ordering::Relaxed);

            state = self.state.lock().await;
            self.check_downstream(&mut state).await?;
            if let Some(downstream) = state.downstream_seqno {
                // The event may have been applied while we slept.
                if seqno <= downstream {
                    debug!(store = %self.name, seqno, "Discarding event applied while sleeping");
                    return Ok(false);
                }
            }
        }

        self.prefetch_events.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn check_downstream(&self, state: &mut PrefetchState) -> Result<(), StoreError> {
        state.last_checked = Some(Instant::now());
        let Some(header) = self.probe.fetch_position().await? else {
            return Ok(());
        };

        let downstream = match state.downstream_seqno {
            // First probe: assume the downstream will shortly consume a
            // warm-up batch so the cache still gets populated ahead of it.
            None => header.seqno + self.config.warm_up_event_count as i64,
            Some(_) => header.seqno,
        };
        state.downstream_seqno = Some(downstream);
        *self.lock_downstream_header() = Some(header);

        // Advance the applied-time base to the newest event the downstream
        // has consumed and prune everything older.
        if let Some((_, &time)) = state.seen_times.range(..=downstream).next_back() {
            state.init_time_ms = Some(time);
        }
        state.seen_times = state.seen_times.split_off(&downstream);
        Ok(())
    }

    fn lock_downstream_header(&self) -> std::sync::MutexGuard<'_, Option<EventHeader>> {
        self.downstream_header
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for PrefetchQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn partitions(&self) -> usize {
        1
    }

    async fn put(&self, task_id: usize, event: ReplEvent) -> Result<(), StoreError> {
        check_partition(&self.name, task_id, 1)?;
        let wanted = match &event {
            ReplEvent::Dbms(dbms) => self.filter(dbms).await?,
            // Control markers pass through unfiltered.
            ReplEvent::Control(_) => true,
        };
        if wanted {
            self.queue
                .put(event)
                .await
                .map_err(|_| StoreError::Closed(self.name.clone()))?;
        }
        Ok(())
    }

    async fn get(&self, partition: usize) -> Result<ReplEvent, StoreError> {
        check_partition(&self.name, partition, 1)?;
        self.queue
            .take()
            .await
            .map_err(|_| StoreError::Closed(self.name.clone()))
    }

    async fn peek(&self, partition: usize) -> Result<Option<ReplEvent>, StoreError> {
        check_partition(&self.name, partition, 1)?;
        Ok(self.queue.peek())
    }

    fn len(&self, partition: usize) -> Result<usize, StoreError> {
        check_partition(&self.name, partition, 1)?;
        Ok(self.queue.len())
    }

    /// Ignored: restart coordinates come from the downstream, not from
    /// stages consuming this store.
    fn set_last_header(&self, task_id: usize, _header: EventHeader) -> Result<(), StoreError> {
        check_partition(&self.name, task_id, 1)?;
        Ok(())
    }

    fn last_header(&self, task_id: usize) -> Result<Option<EventHeader>, StoreError> {
        check_partition(&self.name, task_id, 1)?;
        Ok(self.lock_downstream_header().clone())
    }

    fn status(&self) -> StatusReport {
        let total = self.total_events.load(Ordering::Relaxed);
        let prefetched = self.prefetch_events.load(Ordering::Relaxed);
        let ratio = if total > 0 {
            prefetched as f64 / total as f64
        } else {
            0.0
        };
        let mut status = StatusReport::new();
        status
            .set("storeSize", self.queue.len())
            .set("maxSize", self.queue.capacity())
            .set("eventCount", total)
            .set("prefetchEvents", prefetched)
            .set("prefetchRatio", format!("{ratio:.3}"))
            .set(
                "prefetchState",
                if self.sleeping.load(Ordering::Relaxed) {
                    "sleeping"
                } else {
                    "active"
                },
            )
            .set("timeSleeping", {
                let ms = self.sleep_time_ms.load(Ordering::Relaxed);
                format!("{:.3}", ms as f64 / 1000.0)
            })
            .set("aheadMaxTime", self.config.ahead_max_time.as_millis())
            .set("checkInterval", self.config.check_interval.as_millis())
            .set("sleepTime", self.config.sleep_time.as_millis())
            .set("warmUpEventCount", self.config.warm_up_event_count);
        status
    }

    fn release(&self) {
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use relay_model::DbmsData;
    use std::sync::Arc;
    use std::sync::Mutex as PlainMutex;

    fn header(seqno: i64, source_ms: i64) -> EventHeader {
        EventHeader {
            seqno,
            fragno: 0,
            last_frag: true,
            source_id: "db1".into(),
            epoch_number: 0,
            event_id: format!("log:{seqno}"),
            shard_id: "shop".into(),
            source_tstamp: Utc.timestamp_millis_opt(source_ms).unwrap(),
        }
    }

    fn event(seqno: i64, source_ms: i64) -> ReplEvent {
        ReplDbmsEvent::new(header(seqno, source_ms), vec![DbmsData::statement("SELECT 1")])
            .into()
    }

    /// Scripted downstream whose position the test advances by hand.
    struct FakeDownstream {
        position: PlainMutex<Option<EventHeader>>,
    }

    impl FakeDownstream {
        fn new() -> Arc<Self> {
            Arc::new(FakeDownstream {
                position: PlainMutex::new(None),
            })
        }

        fn advance(&self, seqno: i64, source_ms: i64) {
            *self.position.lock().unwrap() = Some(header(seqno, source_ms));
        }
    }

    #[async_trait]
    impl CommitPositionProbe for FakeDownstream {
        async fn fetch_position(&self) -> Result<Option<EventHeader>, StoreError> {
            Ok(self.position.lock().unwrap().clone())
        }
    }

    fn config() -> PrefetchConfig {
        PrefetchConfig {
            check_interval: Duration::ZERO, // probe on every event
            ahead_max_time: Duration::from_millis(3000),
            sleep_time: Duration::from_millis(10),
            warm_up_event_count: 0,
        }
    }

    #[tokio::test]
    async fn drops_events_already_applied_downstream() {
        let downstream = FakeDownstream::new();
        downstream.advance(5, 0);
        let queue = PrefetchQueue::new("prefetch", 16, downstream.clone(), config()).unwrap();

        for seqno in 0..8 {
            queue.put(0, event(seqno, seqno * 100)).await.unwrap();
        }
        // Only seqno 6 and 7 survive the downstream position of 5.
        assert_eq!(queue.len(0).unwrap(), 2);
        assert_eq!(queue.get(0).await.unwrap().seqno(), 6);
        assert_eq!(queue.get(0).await.unwrap().seqno(), 7);

        let status = queue.status();
        assert_eq!(status.get("eventCount"), Some("8"));
        assert_eq!(status.get("prefetchEvents"), Some("2"));
    }

    #[tokio::test]
    async fn warm_up_offsets_the_first_probe() {
        let downstream = FakeDownstream::new();
        downstream.advance(0, 0);
        let mut cfg = config();
        cfg.warm_up_event_count = 3;
        let queue = PrefetchQueue::new("prefetch", 16, downstream.clone(), cfg).unwrap();

        // With warm-up 3, the effective downstream position is 3: events up
        // to seqno 3 are treated as already covered.
        queue.put(0, event(2, 0)).await.unwrap();
        queue.put(0, event(4, 0)).await.unwrap();
        assert_eq!(queue.len(0).unwrap(), 1);
        assert_eq!(queue.peek(0).await.unwrap().unwrap().seqno(), 4);
    }

    #[tokio::test]
    async fn holds_producer_while_too_far_ahead() {
        let downstream = FakeDownstream::new();
        downstream.advance(0, 0);
        let queue =
            Arc::new(PrefetchQueue::new("prefetch", 16, downstream.clone(), config()).unwrap());

        // A steady stream establishes the applied-time base at 0.
        queue.put(0, event(1, 0)).await.unwrap();
        queue.put(0, event(2, 1000)).await.unwrap();
        queue.put(0, event(3, 2000)).await.unwrap();

        // 5s ahead of the base: must hold.
        let held = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(0, event(4, 5000)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!held.is_finished(), "producer must be parked");
        assert_eq!(queue.status().get("prefetchState"), Some("sleeping"));

        // Downstream applies up to seqno 3 (source time 2000); the gap
        // narrows to ahead_max_time and the producer resumes on the next
        // re-check.
        downstream.advance(3, 2000);
        tokio::time::timeout(Duration::from_secs(2), held)
            .await
            .expect("producer released")
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(0).unwrap(), 4);
    }

    #[tokio::test]
    async fn event_applied_while_sleeping_is_dropped() {
        let downstream = FakeDownstream::new();
        downstream.advance(0, 0);
        let queue =
            Arc::new(PrefetchQueue::new("prefetch", 16, downstream.clone(), config()).unwrap());
        queue.put(0, event(1, 1000)).await.unwrap();

        let held = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(0, event(2, 11_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!held.is_finished());

        // Downstream leaps past the held event entirely; the next re-check
        // drops it instead of enqueuing.
        downstream.advance(2, 11_000);
        tokio::time::timeout(Duration::from_secs(2), held)
            .await
            .expect("producer released")
            .unwrap()
            .unwrap();
        assert_eq!(queue.len(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn last_header_reports_downstream_position() {
        let downstream = FakeDownstream::new();
        downstream.advance(7, 700);
        let queue = PrefetchQueue::new("prefetch", 16, downstream.clone(), config()).unwrap();
        assert!(queue.last_header(0).unwrap().is_none());

        queue.put(0, event(9, 900)).await.unwrap();
        assert_eq!(queue.last_header(0).unwrap().unwrap().seqno, 7);

        // Headers recorded by downstream stages are ignored.
        queue.set_last_header(0, header(1, 100)).unwrap();
        assert_eq!(queue.last_header(0).unwrap().unwrap().seqno, 7);
    }
}
