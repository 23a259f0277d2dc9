//! Language-model clients for contact extraction and identity verification.
//!
//! - [`client`]: the [`ChatClient`] seam and an OpenAI-compatible HTTP client
//! - [`retry`]: bounded exponential backoff for transient failures
//! - [`extraction`] / [`verification`]: the two model-backed contracts the
//!   retrieval pipeline calls per candidate page

pub mod client;
pub mod extraction;
pub mod retry;
pub mod verification;

pub use client::{CallError, ChatClient, OpenAiCompatClient, parse_json_object};
pub use extraction::{ExtractionClient, LlmExtractionClient};
pub use retry::{RetryPolicy, with_retry};
pub use verification::{LlmVerificationClient, VerificationClient};
