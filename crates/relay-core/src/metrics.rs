use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    events_extracted: AtomicU64,
    events_applied: AtomicU64,
    events_filtered: AtomicU64,
    failure_count: AtomicU64,
}

/// Shared pipeline counters. Clones share the same underlying values.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub events_extracted: u64,
    pub events_applied: u64,
    pub events_filtered: u64,
    pub failure_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_extracted(&self, count: u64) {
        self.inner
            .events_extracted
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_applied(&self, count: u64) {
        self.inner.events_applied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_filtered(&self, count: u64) {
        self.inner
            .events_filtered
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_extracted: self.inner.events_extracted.load(Ordering::Relaxed),
            events_applied: self.inner.events_applied.load(Ordering::Relaxed),
            events_filtered: self.inner.events_filtered.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}
