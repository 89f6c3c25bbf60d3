//! Metrics seam
//!
//! The engine and the ingestion loop report counters through an injected
//! sink; there is no process-wide mutable state. Wire a real backend by
//! implementing [`MetricsSink`].

use std::collections::HashMap;
use std::sync::Mutex;

/// Counters the core reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    ClaimsApplied,
    ClaimsFailed,
    RefreshesInPlace,
    RelationshipsClosed,
    RelationshipsCreated,
    TerminationsNoop,
    CascadesApplied,
    CascadesIgnored,
    RecordsSkipped,
    RetriesScheduled,
}

impl Counter {
    pub fn name(self) -> &'static str {
        match self {
            Self::ClaimsApplied => "claims_applied",
            Self::ClaimsFailed => "claims_failed",
            Self::RefreshesInPlace => "refreshes_in_place",
            Self::RelationshipsClosed => "relationships_closed",
            Self::RelationshipsCreated => "relationships_created",
            Self::TerminationsNoop => "terminations_noop",
            Self::CascadesApplied => "cascades_applied",
            Self::CascadesIgnored => "cascades_ignored",
            Self::RecordsSkipped => "records_skipped",
            Self::RetriesScheduled => "retries_scheduled",
        }
    }
}

/// Counter sink injected into the engine and the ingestion loop
pub trait MetricsSink: Send + Sync {
    fn incr(&self, counter: Counter);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _counter: Counter) {}
}

/// In-memory counting sink for tests and the status command
#[derive(Default)]
pub struct CountingMetrics {
    counts: Mutex<HashMap<Counter, u64>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        *self
            .counts
            .lock()
            .expect("metrics lock poisoned")
            .get(&counter)
            .unwrap_or(&0)
    }
}

impl MetricsSink for CountingMetrics {
    fn incr(&self, counter: Counter) {
        *self
            .counts
            .lock()
            .expect("metrics lock poisoned")
            .entry(counter)
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_metrics() {
        let metrics = CountingMetrics::new();
        assert_eq!(metrics.get(Counter::ClaimsApplied), 0);

        metrics.incr(Counter::ClaimsApplied);
        metrics.incr(Counter::ClaimsApplied);
        metrics.incr(Counter::RecordsSkipped);

        assert_eq!(metrics.get(Counter::ClaimsApplied), 2);
        assert_eq!(metrics.get(Counter::RecordsSkipped), 1);
        assert_eq!(metrics.get(Counter::ClaimsFailed), 0);
    }

    #[test]
    fn test_counter_names() {
        assert_eq!(Counter::ClaimsApplied.name(), "claims_applied");
        assert_eq!(Counter::RetriesScheduled.name(), "retries_scheduled");
    }
}
