//! Core domain types for contact retrieval runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, ScoutError};

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one orchestrator run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// InputRecord
// ---------------------------------------------------------------------------

/// Identity fields for one professional whose contact details are sought.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Caller-assigned identifier (spreadsheet row or project id).
    pub id: String,
    /// Full display name, possibly with post-nominals ("Jane Doe, MD").
    #[serde(default)]
    pub name: String,
    /// Professional title or specialty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// State or region code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Known street address, used only as verification context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl InputRecord {
    /// Create a record with just an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            title: None,
            city: None,
            state: None,
            address: None,
        }
    }

    /// Build a record from separate first/middle/last name columns.
    pub fn from_name_parts(id: impl Into<String>, first: &str, middle: &str, last: &str) -> Self {
        let name = [first, middle, last]
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self::new(id, name)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// "City, ST" style location hint; empty when neither is known.
    pub fn location(&self) -> String {
        [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Reject records too sparse to form a meaningful query.
    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ScoutError::invalid_record(&self.id, "name is missing"));
        }
        if !name.chars().any(char::is_alphabetic) {
            return Err(ScoutError::invalid_record(
                &self.id,
                format!("name {name:?} contains no letters"),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Domain policies and tiers
// ---------------------------------------------------------------------------

/// Whether `host` falls under `pattern`.
///
/// A leading dot matches any host ending with the suffix (`.gov`); otherwise
/// the pattern matches the domain itself and its subdomains.
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim().to_ascii_lowercase();
    if pattern.is_empty() {
        return false;
    }
    if pattern.starts_with('.') {
        return host.ends_with(&pattern);
    }
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

/// Source-domain restriction applied to a tier's query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainPolicy {
    Unrestricted,
    /// Only these domains are requested.
    Allow { domains: Vec<String> },
    /// These domains are excluded from the request.
    Deny { domains: Vec<String> },
}

/// Static definition of one search tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDefinition {
    /// 1-based position in the escalation order.
    pub rank: u8,
    /// Query template; `{name}`, `{title}`, `{city}`, `{state}`, `{location}`
    /// are substituted from the record.
    pub template: String,
    pub policy: DomainPolicy,
}

/// A planned query for one tier of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierQuery {
    pub rank: u8,
    /// Full query string including any `site:` modifiers.
    pub query: String,
    pub policy: DomainPolicy,
}

/// Domains removed from search results at every tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyList {
    domains: Vec<String>,
}

impl DenyList {
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    /// True if the URL's host is on the list (or the URL has no host).
    pub fn is_denied(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => self.domains.iter().any(|d| host_matches(host, d)),
            None => true,
        }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }
}

/// A random pause drawn uniformly from `min..=max`.
///
/// Used to space out search-engine traffic between tiers and records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Bounds given in either order are sorted.
    pub fn new(a: Duration, b: Duration) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_millis([a, b]: [u64; 2]) -> Self {
        Self::new(Duration::from_millis(a), Duration::from_millis(b))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw one pause.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

// ---------------------------------------------------------------------------
// Search and fetch artifacts
// ---------------------------------------------------------------------------

/// One candidate URL returned by a tier's search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCandidate {
    /// 1-based position after deny-list filtering.
    pub rank: usize,
    pub url: Url,
}

/// Ranked candidates for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub tier: u8,
    pub query: String,
    pub candidates: Vec<SearchCandidate>,
}

/// Visible text of one fetched page.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: Url,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
    /// SHA-256 hex digest of `text`, recorded in the audit trail.
    pub digest: String,
}

impl PageContent {
    pub fn new(url: Url, text: String) -> Self {
        let digest = compute_digest(&text);
        Self {
            url,
            text,
            fetched_at: Utc::now(),
            digest,
        }
    }
}

/// Compute the SHA-256 hex digest of page text.
pub fn compute_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Extraction and verification
// ---------------------------------------------------------------------------

/// Contact fields pulled from one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub source_url: String,
}

impl ExtractedContact {
    pub fn empty(source_url: impl Into<String>) -> Self {
        Self {
            phone: None,
            email: None,
            address: None,
            source_url: source_url.into(),
        }
    }

    pub fn has_any_field(&self) -> bool {
        self.phone.is_some() || self.email.is_some() || self.address.is_some()
    }

    /// Address only, with neither phone nor email.
    pub fn is_partial(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.address.is_some()
    }
}

/// Identity-match score for one extracted contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// 0 (certainly someone else) to 100 (certainly the same person).
    pub confidence: u8,
    pub plausible_match: bool,
    #[serde(default)]
    pub reasoning: String,
}

impl VerificationOutcome {
    pub fn new(confidence: u8, plausible_match: bool, reasoning: impl Into<String>) -> Self {
        Self {
            confidence: confidence.min(100),
            plausible_match,
            reasoning: reasoning.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// What happened to one attempted URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    Verified { confidence: u8, plausible_match: bool },
    /// Fetched, but the page yielded no contact fields.
    NoContact,
    FetchFailed { reason: String },
    ExtractionFailed { reason: String },
    VerificationFailed { reason: String },
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tier: u8,
    pub rank: usize,
    pub url: String,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Per-tier summary kept on the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSummary {
    pub rank: u8,
    pub query: String,
    pub candidates: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_error: Option<String>,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Resolved,
    TiersExhausted,
    BudgetExhausted,
}

/// Mutable bookkeeping accumulated during one run, frozen into a result.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    pub run_id: RunId,
    pub record_id: String,
    pub started_at: DateTime<Utc>,
    /// Highest tier entered so far (0 before the first tier).
    pub last_tier: u8,
    pub visited_urls: Vec<String>,
    pub entries: Vec<AuditEntry>,
    pub tiers: Vec<TierSummary>,
}

impl AuditTrail {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            record_id: record_id.into(),
            started_at: Utc::now(),
            last_tier: 0,
            visited_urls: Vec::new(),
            entries: Vec::new(),
            tiers: Vec::new(),
        }
    }

    pub fn record(&mut self, tier: u8, rank: usize, url: &Url, outcome: AuditOutcome, digest: Option<&str>) {
        self.entries.push(AuditEntry {
            tier,
            rank,
            url: url.to_string(),
            outcome,
            content_digest: digest.map(str::to_string),
            recorded_at: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// RetrievalResult
// ---------------------------------------------------------------------------

/// Terminal status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Found,
    NotFound,
}

/// The winning candidate of a Found run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub contact: ExtractedContact,
    pub outcome: VerificationOutcome,
    pub tier: u8,
}

/// Immutable, audit-complete outcome of one record's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    run_id: RunId,
    record_id: String,
    status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contact: Option<ExtractedContact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
    tier: u8,
    termination: Termination,
    visited_urls: Vec<String>,
    audit: Vec<AuditEntry>,
    tiers: Vec<TierSummary>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl RetrievalResult {
    /// Build a Found result, enforcing the provenance invariants.
    pub fn found(trail: AuditTrail, evidence: Evidence, threshold: u8) -> Result<Self> {
        if evidence.contact.source_url.trim().is_empty() {
            return Err(ScoutError::config("found result requires a source URL"));
        }
        if evidence.outcome.confidence < threshold {
            return Err(ScoutError::config(format!(
                "found result confidence {} is below threshold {threshold}",
                evidence.outcome.confidence
            )));
        }
        Ok(Self::assemble(
            trail,
            MatchStatus::Found,
            evidence.tier,
            Termination::Resolved,
            Some(evidence),
        ))
    }

    /// Build a NotFound result at the last attempted tier.
    pub fn not_found(trail: AuditTrail, termination: Termination) -> Self {
        let tier = trail.last_tier;
        Self::assemble(trail, MatchStatus::NotFound, tier, termination, None)
    }

    fn assemble(
        mut trail: AuditTrail,
        status: MatchStatus,
        tier: u8,
        termination: Termination,
        evidence: Option<Evidence>,
    ) -> Self {
        trail.entries.sort_by_key(|e| (e.tier, e.rank));
        let (contact, confidence, reasoning) = match evidence {
            Some(ev) => (
                Some(ev.contact),
                Some(ev.outcome.confidence),
                Some(ev.outcome.reasoning),
            ),
            None => (None, None, None),
        };
        Self {
            run_id: trail.run_id,
            record_id: trail.record_id,
            status,
            contact,
            confidence,
            reasoning,
            tier,
            termination,
            visited_urls: trail.visited_urls,
            audit: trail.entries,
            tiers: trail.tiers,
            started_at: trail.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn contact(&self) -> Option<&ExtractedContact> {
        self.contact.as_ref()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.contact.as_ref().map(|c| c.source_url.as_str())
    }

    pub fn confidence(&self) -> Option<u8> {
        self.confidence
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    /// Tier at which the run resolved, or the last tier attempted.
    pub fn tier(&self) -> u8 {
        self.tier
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Every URL the fetch phase attempted, in tier order.
    pub fn visited_urls(&self) -> &[String] {
        &self.visited_urls
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    pub fn tiers(&self) -> &[TierSummary] {
        &self.tiers
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Found with an address but neither phone nor email.
    pub fn is_partial(&self) -> bool {
        self.status == MatchStatus::Found && self.contact.as_ref().is_some_and(|c| c.is_partial())
    }
}
