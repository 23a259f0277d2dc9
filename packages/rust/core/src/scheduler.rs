//! Batch scheduling: one orchestrator run per record, bounded parallelism.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use contactscout_shared::{DelayRange, InputRecord, RetrievalResult, ScoutError};

use crate::orchestrator::RetrievalOrchestrator;
use crate::sink::ResultSink;
use crate::stats::{BatchReport, BatchStats, RecordFailure};

/// Terminal state of one record in a batch.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Completed(Box<RetrievalResult>),
    Invalid { record_id: String, reason: String },
    Cancelled { record_id: String },
    Failed { record_id: String, error: String },
}

impl RecordOutcome {
    pub fn record_id(&self) -> &str {
        match self {
            RecordOutcome::Completed(result) => result.record_id(),
            RecordOutcome::Invalid { record_id, .. }
            | RecordOutcome::Cancelled { record_id }
            | RecordOutcome::Failed { record_id, .. } => record_id,
        }
    }
}

/// Trait for reporting batch progress to the user.
pub trait BatchProgress: Send + Sync {
    /// Called once before any record starts.
    fn batch_started(&self, total: usize);
    /// Called when a record is admitted.
    fn record_started(&self, record_id: &str);
    /// Called when a record reaches a terminal state.
    fn record_finished(&self, outcome: &RecordOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn batch_started(&self, _total: usize) {}
    fn record_started(&self, _record_id: &str) {}
    fn record_finished(&self, _outcome: &RecordOutcome) {}
}

/// Cancellation handles for a batch and each of its running records.
///
/// Record tokens are children of the batch token, so cancelling the batch
/// reaches every record while cancelling one record touches nothing else.
#[derive(Debug, Clone, Default)]
pub struct BatchCancel {
    batch: CancellationToken,
    records: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl BatchCancel {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, record_id: &str) -> CancellationToken {
        let token = self.batch.child_token();
        if let Ok(mut records) = self.records.lock() {
            records.insert(record_id.to_string(), token.clone());
        }
        token
    }

    fn unregister(&self, record_id: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(record_id);
        }
    }

    /// Cancel one running record. Returns false if it is not running.
    pub fn cancel_record(&self, record_id: &str) -> bool {
        let token = self
            .records
            .lock()
            .ok()
            .and_then(|records| records.get(record_id).cloned());
        match token {
            Some(token) => {
                info!(record_id, "cancelling record");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop admitting records and cancel every running one.
    pub fn cancel_all(&self) {
        info!("cancelling batch");
        self.batch.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.batch.is_cancelled()
    }
}

/// Runs a batch of records, at most `parallelism` at a time.
pub struct ConcurrencyScheduler {
    orchestrator: Arc<RetrievalOrchestrator>,
    parallelism: usize,
    record_delay: DelayRange,
}

impl ConcurrencyScheduler {
    /// `parallelism` is clamped to `1..=pool_capacity`; running more records
    /// than sessions only queues them on the pool.
    pub fn new(orchestrator: Arc<RetrievalOrchestrator>, parallelism: usize, pool_capacity: usize) -> Self {
        let parallelism = parallelism.clamp(1, pool_capacity.max(1));
        Self {
            orchestrator,
            parallelism,
            record_delay: DelayRange::NONE,
        }
    }

    /// Pause for a random `record_delay` before admitting each record after
    /// the first.
    pub fn with_record_delay(mut self, record_delay: DelayRange) -> Self {
        self.record_delay = record_delay;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Process every record, handing each result to `sink` as it finishes.
    ///
    /// Records are admitted only as slots free, so completion order is not
    /// input order. Records still queued when the batch is cancelled are
    /// reported as cancelled without starting. A record whose id repeats an
    /// earlier one is reported invalid and never runs.
    #[instrument(skip_all, fields(records = records.len(), parallelism = self.parallelism))]
    pub async fn run(
        &self,
        records: Vec<InputRecord>,
        sink: &dyn ResultSink,
        progress: &dyn BatchProgress,
        cancel: &BatchCancel,
    ) -> BatchReport {
        let start = Instant::now();
        let mut stats = BatchStats {
            total: records.len(),
            ..BatchStats::default()
        };
        let mut failures = Vec::new();
        let mut running = JoinSet::new();
        let mut in_flight: HashMap<task::Id, String> = HashMap::new();
        let mut admitted = 0usize;

        progress.batch_started(stats.total);
        info!("batch started");

        let mut seen = HashSet::new();
        let mut queue = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.id.clone()) {
                queue.push(record);
            } else {
                let outcome = RecordOutcome::Invalid {
                    record_id: record.id,
                    reason: "duplicate record id in batch".into(),
                };
                tally(&mut stats, &mut failures, &outcome);
                progress.record_finished(&outcome);
            }
        }
        let mut pending = queue.into_iter();

        loop {
            while running.len() < self.parallelism
                && !cancel.is_cancelled()
                && !pending.as_slice().is_empty()
            {
                if admitted > 0 && !self.record_delay.is_zero() {
                    self.pause(cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                let Some(record) = pending.next() else { break };
                let record_id = record.id.clone();
                let token = cancel.register(&record_id);
                let orchestrator = self.orchestrator.clone();
                progress.record_started(&record_id);

                let handle = running.spawn(async move { orchestrator.run(&record, &token).await });
                in_flight.insert(handle.id(), record_id);
                admitted += 1;
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (task_id, run) = match joined {
                Ok((id, run)) => (id, Ok(run)),
                Err(e) => (e.id(), Err(e)),
            };
            let record_id = in_flight.remove(&task_id).unwrap_or_else(|| {
                error!(%task_id, "joined a task that was never admitted");
                format!("task-{task_id}")
            });
            cancel.unregister(&record_id);

            let outcome = match run {
                Ok(Ok(result)) => match sink.accept(&result).await {
                    Ok(()) => RecordOutcome::Completed(Box::new(result)),
                    Err(e) => RecordOutcome::Failed {
                        record_id,
                        error: e.to_string(),
                    },
                },
                Ok(Err(ScoutError::InvalidRecord { reason, .. })) => {
                    RecordOutcome::Invalid { record_id, reason }
                }
                Ok(Err(ScoutError::Cancelled)) => RecordOutcome::Cancelled { record_id },
                Ok(Err(e)) => RecordOutcome::Failed {
                    record_id,
                    error: e.to_string(),
                },
                Err(e) => RecordOutcome::Failed {
                    record_id,
                    error: format!("record task panicked: {e}"),
                },
            };

            tally(&mut stats, &mut failures, &outcome);
            progress.record_finished(&outcome);
        }

        for record in pending {
            let outcome = RecordOutcome::Cancelled {
                record_id: record.id,
            };
            tally(&mut stats, &mut failures, &outcome);
            progress.record_finished(&outcome);
        }

        if let Err(e) = sink.finish().await {
            warn!(error = %e, "sink flush failed");
        }

        let report = BatchReport {
            stats,
            failures,
            duration: start.elapsed(),
        };
        info!(
            found = report.stats.found,
            partial = report.stats.partial,
            not_found = report.stats.not_found,
            invalid = report.stats.invalid,
            cancelled = report.stats.cancelled,
            failed = report.stats.failed,
            duration_ms = report.duration.as_millis() as u64,
            "batch finished"
        );
        report
    }

    /// Sleep one sampled record delay, waking early if the batch is cancelled.
    async fn pause(&self, cancel: &BatchCancel) {
        let pause = self.record_delay.sample();
        debug!(pause_ms = pause.as_millis() as u64, "pausing before next record");
        tokio::select! {
            _ = cancel.batch.cancelled() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

fn tally(stats: &mut BatchStats, failures: &mut Vec<RecordFailure>, outcome: &RecordOutcome) {
    match outcome {
        RecordOutcome::Completed(result) => stats.record_result(result),
        RecordOutcome::Invalid { record_id, reason } => {
            warn!(record_id, reason, "invalid record");
            stats.invalid += 1;
            failures.push(RecordFailure {
                record_id: record_id.clone(),
                reason: reason.clone(),
            });
        }
        RecordOutcome::Cancelled { .. } => stats.cancelled += 1,
        RecordOutcome::Failed { record_id, error } => {
            error!(record_id, error, "record failed");
            stats.failed += 1;
            failures.push(RecordFailure {
                record_id: record_id.clone(),
                reason: error.clone(),
            });
        }
    }
}
