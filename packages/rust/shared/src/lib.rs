//! Shared types, error model, and configuration for contactscout.
//!
//! This crate is the foundation depended on by all other contactscout crates.
//! It provides:
//! - [`ScoutError`]: the unified error type
//! - Domain types ([`InputRecord`], [`TierQuery`], [`PageContent`],
//!   [`ExtractedContact`], [`VerificationOutcome`], [`RetrievalResult`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DecisionConfig, ImpactConfig, LlmConfig, LlmProvider, PipelineConfig, PoolConfig,
    SchedulerConfig, SearchConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key, validate_tiers,
};
pub use error::{Result, ScoutError};
pub use types::{
    AuditEntry, AuditOutcome, AuditTrail, DelayRange, DenyList, DomainPolicy, Evidence,
    ExtractedContact, InputRecord, MatchStatus, PageContent, RetrievalResult, RunId,
    SearchCandidate, SearchResult, Termination, TierDefinition, TierQuery, TierSummary,
    VerificationOutcome, compute_digest, host_matches,
};
