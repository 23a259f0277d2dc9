//! Retrieval orchestration and batch scheduling for contactscout.
//!
//! This crate ties the browser and model crates together into the per-record
//! tiered retrieval state machine and runs it across a batch of records.

pub mod decision;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod scheduler;
pub mod sink;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use decision::{Decision, ScoredCandidate, decide, select_best};
pub use orchestrator::{OrchestratorSettings, RetrievalOrchestrator};
pub use pipeline::{Pipeline, load_records, parse_records};
pub use planner::{QueryTierPlanner, render_template};
pub use scheduler::{BatchCancel, BatchProgress, ConcurrencyScheduler, RecordOutcome, SilentProgress};
pub use sink::{JsonLinesSink, MemorySink, ResultSink};
pub use stats::{BatchReport, BatchStats, ImpactMetrics, RecordFailure};
