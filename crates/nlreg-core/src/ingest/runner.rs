//! The ingestion loop
//!
//! One loop per inbound stream. Records apply strictly in order; the offset
//! commits only after the record fully applied, so every record applies at
//! least once. A failing record blocks the stream (rewind, back off, retry)
//! unless the skip policy is configured and the failure is skippable.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::claim::Claim;
use crate::domain::identity::IdentityChange;
use crate::error::{Error, Result};
use crate::ingest::leader::LeadershipMonitor;
use crate::ingest::source::{RecordSource, SourceRecord};
use crate::metrics::{Counter, MetricsSink};
use crate::reconcile::ReconcileEngine;

/// How often the loop re-checks leadership while not consuming
const LEADERSHIP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long to sleep when the stream has no new records
const IDLE_INTERVAL: Duration = Duration::from_millis(500);

/// What to do with a record that fails non-transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Hold position and retry until the record applies (default)
    Block,
    /// Log, commit past the record, continue. Non-production escape hatch
    /// for poison records: malformed payloads and identifiers the registry
    /// never learns about. Inactive identities and infrastructure failures
    /// still block.
    Skip,
}

/// Retry behavior for a blocked stream
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub on_error: OnErrorPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(60),
            on_error: OnErrorPolicy::Block,
        }
    }
}

/// What the records of a stream deserialize into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Claims,
    IdentityChanges,
}

/// Outcome of processing one polled batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// Nothing to read
    Idle,
    /// Applied and committed this many records
    Progressed(usize),
    /// A record failed; position rewound to the last commit
    Blocked,
}

/// Singleton consumer of one inbound stream
pub struct IngestLoop {
    engine: Arc<ReconcileEngine>,
    source: Box<dyn RecordSource>,
    kind: RecordKind,
    retry: RetryPolicy,
    batch_size: usize,
    metrics: Arc<dyn MetricsSink>,
}

impl IngestLoop {
    pub fn new(
        engine: Arc<ReconcileEngine>,
        source: Box<dyn RecordSource>,
        kind: RecordKind,
        retry: RetryPolicy,
        batch_size: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            engine,
            source,
            kind,
            retry,
            batch_size,
            metrics,
        }
    }

    /// Consume the stream until cancelled. Leadership is re-checked before
    /// every batch; an in-flight record always runs to completion.
    pub async fn run(mut self, mut leader: LeadershipMonitor, cancel: CancellationToken) {
        info!(source = %self.source.name(), kind = ?self.kind, "Ingestion loop started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !leader.poll().await.may_consume() {
                if sleep_or_cancel(LEADERSHIP_POLL_INTERVAL, &cancel).await {
                    break;
                }
                continue;
            }

            match self.step(&cancel).await {
                Ok(StepOutcome::Progressed(n)) => {
                    debug!(source = %self.source.name(), records = n, "Batch applied");
                }
                Ok(StepOutcome::Idle) => {
                    if sleep_or_cancel(IDLE_INTERVAL, &cancel).await {
                        break;
                    }
                }
                Ok(StepOutcome::Blocked) => {
                    if sleep_or_cancel(self.retry.backoff, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    // Source-level failure (offset table unreachable etc.)
                    warn!(source = %self.source.name(), error = %e, "Ingestion step failed");
                    if sleep_or_cancel(self.retry.backoff, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!(source = %self.source.name(), "Ingestion loop stopped");
    }

    /// Poll once and apply the batch in order, committing after each record
    async fn step(&mut self, cancel: &CancellationToken) -> Result<StepOutcome> {
        let batch = self.source.poll(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(StepOutcome::Idle);
        }

        let mut applied = 0usize;
        for record in &batch {
            match self.apply_record(record).await {
                Ok(()) => {
                    self.source.commit(record.offset).await?;
                    applied += 1;
                }
                Err(e) if self.retry.on_error == OnErrorPolicy::Skip && e.is_skippable() => {
                    warn!(
                        source = %self.source.name(),
                        offset = record.offset,
                        error = %e,
                        "Skipping unprocessable record"
                    );
                    self.metrics.incr(Counter::RecordsSkipped);
                    self.source.commit(record.offset).await?;
                    applied += 1;
                }
                Err(e) => {
                    warn!(
                        source = %self.source.name(),
                        offset = record.offset,
                        error = %e,
                        "Record failed, holding position"
                    );
                    self.metrics.incr(Counter::RetriesScheduled);
                    self.source.rewind().await?;
                    return Ok(StepOutcome::Blocked);
                }
            }

            // Shutdown between records; the committed prefix stays applied
            if cancel.is_cancelled() {
                break;
            }
        }

        Ok(StepOutcome::Progressed(applied))
    }

    async fn apply_record(&self, record: &SourceRecord) -> Result<()> {
        match self.kind {
            RecordKind::Claims => {
                let claim: Claim = serde_json::from_str(&record.payload).map_err(|e| {
                    Error::MalformedClaim(format!("offset {}: {}", record.offset, e))
                })?;
                self.engine.apply_claim(&claim).await?;
            }
            RecordKind::IdentityChanges => {
                let change: IdentityChange =
                    serde_json::from_str(&record.payload).map_err(|e| {
                        Error::MalformedClaim(format!("offset {}: {}", record.offset, e))
                    })?;
                self.engine.apply_identity_change(&change).await?;
            }
        }
        Ok(())
    }
}

/// Sleep for `duration` unless cancelled first; true means cancelled
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
