//! Error types for contactscout.
//!
//! Library crates use [`ScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all contactscout operations.
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The input record cannot form a meaningful query.
    #[error("invalid record {record_id:?}: {reason}")]
    InvalidRecord { record_id: String, reason: String },

    /// No pooled session became free within the acquire timeout.
    #[error("no browser session available after {waited_ms} ms")]
    PoolExhaustedTimeout { waited_ms: u64 },

    /// A search call exceeded its deadline.
    #[error("search timed out after {waited_ms} ms: {query}")]
    SearchTimeout { query: String, waited_ms: u64 },

    /// A page fetch exceeded its deadline.
    #[error("fetch timed out after {waited_ms} ms: {url}")]
    FetchTimeout { url: String, waited_ms: u64 },

    /// A page was unreachable, malformed, or not text.
    #[error("fetch failed for {url}: {message}")]
    FetchError { url: String, message: String },

    /// An extraction or verification call failed after all retry attempts.
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    ModelCallFailure {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// A provider is permanently unusable (bad credentials, broken pool).
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Cooperative cancellation was observed.
    #[error("record cancelled")]
    Cancelled,

    /// Network/HTTP error below the fetch/search layer.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or model-output parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The persistence sink rejected a result.
    #[error("sink error: {0}")]
    Sink(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScoutError>;

impl ScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-record error.
    pub fn invalid_record(record_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch error for `url`.
    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FetchError {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure only degrades the current candidate or tier.
    ///
    /// Everything else escalates to the caller of the record run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhaustedTimeout { .. }
                | Self::SearchTimeout { .. }
                | Self::FetchTimeout { .. }
                | Self::FetchError { .. }
                | Self::ModelCallFailure { .. }
                | Self::Network(_)
                | Self::Parse { .. }
        )
    }
}
