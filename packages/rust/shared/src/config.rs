//! Application configuration for contactscout.
//!
//! User config lives at `~/.contactscout/contactscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::types::{DelayRange, DenyList, DomainPolicy, TierDefinition};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contactscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contactscout";

// ---------------------------------------------------------------------------
// Config structs (matching contactscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Browser session pool.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Search and page retrieval.
    #[serde(default)]
    pub search: SearchConfig,

    /// Acceptance rule.
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Language-model provider.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Batch scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Impact metric assumptions.
    #[serde(default)]
    pub impact: ImpactConfig,

    /// Escalation tiers, searched in rank order.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            search: SearchConfig::default(),
            decision: DecisionConfig::default(),
            llm: LlmConfig::default(),
            scheduler: SchedulerConfig::default(),
            impact: ImpactConfig::default(),
            tiers: default_tiers(),
        }
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent browsing sessions.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum wait for a free session.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_capacity() -> usize {
    3
}
fn default_acquire_timeout() -> u64 {
    60
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidate URLs kept per tier.
    #[serde(default = "default_max_results")]
    pub max_results_per_record: usize,

    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// HTML search endpoint; `{query}` is replaced with the encoded query.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Page text is truncated to this many characters.
    #[serde(default = "default_max_page_chars")]
    pub max_page_chars: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Removed from results at every tier.
    #[serde(default = "default_deny_domains")]
    pub deny_domains: Vec<String>,

    /// Random pause `[min, max]` before searching the next tier.
    #[serde(default = "default_tier_delay")]
    pub tier_delay_ms: [u64; 2],
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results_per_record: default_max_results(),
            search_timeout_secs: default_search_timeout(),
            page_timeout_secs: default_page_timeout(),
            search_url: default_search_url(),
            max_page_chars: default_max_page_chars(),
            user_agent: default_user_agent(),
            deny_domains: default_deny_domains(),
            tier_delay_ms: default_tier_delay(),
        }
    }
}

fn default_max_results() -> usize {
    5
}
fn default_search_timeout() -> u64 {
    30
}
fn default_page_timeout() -> u64 {
    15
}
fn default_search_url() -> String {
    "https://html.duckduckgo.com/html/?q={query}".into()
}
fn default_max_page_chars() -> usize {
    8_000
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
        .into()
}
fn default_deny_domains() -> Vec<String> {
    [
        "facebook.com",
        "twitter.com",
        "x.com",
        "instagram.com",
        "linkedin.com",
        "tiktok.com",
        "reddit.com",
        "pinterest.com",
        "snapchat.com",
        "threads.net",
        "tumblr.com",
        "youtube.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_tier_delay() -> [u64; 2] {
    [3_000, 8_000]
}

/// `[decision]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Minimum verification score (0–100) to accept a contact.
    #[serde(default = "default_threshold")]
    pub confidence_threshold: u8,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> u8 {
    70
}

/// Which chat-completions dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// OpenAI or any OpenAI-compatible endpoint (OpenRouter, local gateways).
    Openai,
    /// Azure OpenAI deployment.
    AzureOpenai,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,

    /// API base URL (Azure: the resource endpoint).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model id (Azure: deployment name).
    #[serde(default = "default_model")]
    pub model: String,

    /// Azure `api-version` query parameter.
    #[serde(default = "default_azure_api_version")]
    pub azure_api_version: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Page text sent to the model is truncated to this many characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            azure_api_version: default_azure_api_version(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> LlmProvider {
    LlmProvider::Openai
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_azure_api_version() -> String {
    "2024-10-21".into()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1_000
}
fn default_backoff_max() -> u64 {
    10_000
}
fn default_max_input_chars() -> usize {
    6_000
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Records processed at once; clamped to the pool capacity.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Wall-clock budget for one record's run.
    #[serde(default = "default_record_budget")]
    pub record_budget_secs: u64,

    /// Random pause `[min, max]` between record admissions.
    #[serde(default = "default_record_delay")]
    pub record_delay_ms: [u64; 2],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            record_budget_secs: default_record_budget(),
            record_delay_ms: default_record_delay(),
        }
    }
}

fn default_parallelism() -> usize {
    3
}
fn default_record_budget() -> u64 {
    300
}
fn default_record_delay() -> [u64; 2] {
    [5_000, 12_000]
}

/// `[impact]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConfig {
    /// Minutes a person needs to research one record by hand.
    #[serde(default = "default_manual_minutes")]
    pub manual_minutes_per_record: u32,

    #[serde(default = "default_hourly_rate")]
    pub hourly_rate_usd: u32,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            manual_minutes_per_record: default_manual_minutes(),
            hourly_rate_usd: default_hourly_rate(),
        }
    }
}

fn default_manual_minutes() -> u32 {
    15
}
fn default_hourly_rate() -> u32 {
    50
}

fn default_tiers() -> Vec<TierDefinition> {
    let base = "{name} {title} {city} {state} doctor healthcare provider";
    vec![
        TierDefinition {
            rank: 1,
            template: base.into(),
            policy: DomainPolicy::Allow {
                domains: vec!["doximity.com".into(), "npiprofile.com".into()],
            },
        },
        TierDefinition {
            rank: 2,
            template: base.into(),
            policy: DomainPolicy::Allow {
                domains: vec![".gov".into(), ".edu".into()],
            },
        },
        TierDefinition {
            rank: 3,
            template: format!("{base} contact information"),
            policy: DomainPolicy::Unrestricted,
        },
    ]
}

impl AppConfig {
    /// Check value ranges and tier layout.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.pool.capacity) {
            return Err(ScoutError::config(format!(
                "pool.capacity must be between 1 and 10, got {}",
                self.pool.capacity
            )));
        }
        if !(1..=20).contains(&self.search.max_results_per_record) {
            return Err(ScoutError::config(format!(
                "search.max_results_per_record must be between 1 and 20, got {}",
                self.search.max_results_per_record
            )));
        }
        if self.decision.confidence_threshold > 100 {
            return Err(ScoutError::config(format!(
                "decision.confidence_threshold must be at most 100, got {}",
                self.decision.confidence_threshold
            )));
        }
        if self.search.search_timeout_secs < 5 || self.search.page_timeout_secs < 5 {
            return Err(ScoutError::config("search and page timeouts must be at least 5 seconds"));
        }
        if !self.search.search_url.contains("{query}") {
            return Err(ScoutError::config("search.search_url must contain a {query} placeholder"));
        }
        if self.llm.max_attempts == 0 {
            return Err(ScoutError::config("llm.max_attempts must be at least 1"));
        }
        if self.scheduler.parallelism == 0 || self.scheduler.record_budget_secs == 0 {
            return Err(ScoutError::config(
                "scheduler.parallelism and scheduler.record_budget_secs must be positive",
            ));
        }
        for (key, [min, max]) in [
            ("search.tier_delay_ms", self.search.tier_delay_ms),
            ("scheduler.record_delay_ms", self.scheduler.record_delay_ms),
        ] {
            if min > max {
                return Err(ScoutError::config(format!(
                    "{key} must be [min, max] with min <= max, got [{min}, {max}]"
                )));
            }
        }
        validate_tiers(&self.tiers)
    }
}

/// Tier ranks must be exactly 1..=T in order.
pub fn validate_tiers(tiers: &[TierDefinition]) -> Result<()> {
    if tiers.is_empty() {
        return Err(ScoutError::config("at least one tier must be configured"));
    }
    for (i, tier) in tiers.iter().enumerate() {
        if usize::from(tier.rank) != i + 1 {
            return Err(ScoutError::config(format!(
                "tier ranks must be contiguous from 1; position {} has rank {}",
                i + 1,
                tier.rank
            )));
        }
        if !tier.template.contains("{name}") {
            return Err(ScoutError::config(format!(
                "tier {} template must reference {{name}}",
                tier.rank
            )));
        }
        if matches!(&tier.policy, DomainPolicy::Allow { domains } if domains.is_empty()) {
            return Err(ScoutError::config(format!(
                "tier {} allow policy lists no domains",
                tier.rank
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file and CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pool_capacity: usize,
    pub acquire_timeout: Duration,
    pub max_results_per_record: usize,
    pub search_timeout: Duration,
    pub page_timeout: Duration,
    pub search_url: String,
    pub max_page_chars: usize,
    pub user_agent: String,
    pub deny_list: DenyList,
    pub tier_delay: DelayRange,
    pub confidence_threshold: u8,
    pub parallelism: usize,
    pub record_budget: Duration,
    pub record_delay: DelayRange,
    pub tiers: Vec<TierDefinition>,
    pub llm: LlmConfig,
}

impl TryFrom<&AppConfig> for PipelineConfig {
    type Error = ScoutError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool_capacity: config.pool.capacity,
            acquire_timeout: Duration::from_secs(config.pool.acquire_timeout_secs),
            max_results_per_record: config.search.max_results_per_record,
            search_timeout: Duration::from_secs(config.search.search_timeout_secs),
            page_timeout: Duration::from_secs(config.search.page_timeout_secs),
            search_url: config.search.search_url.clone(),
            max_page_chars: config.search.max_page_chars,
            user_agent: config.search.user_agent.clone(),
            deny_list: DenyList::new(config.search.deny_domains.iter().cloned()),
            tier_delay: DelayRange::from_millis(config.search.tier_delay_ms),
            confidence_threshold: config.decision.confidence_threshold,
            parallelism: config.scheduler.parallelism.min(config.pool.capacity),
            record_budget: Duration::from_secs(config.scheduler.record_budget_secs),
            record_delay: DelayRange::from_millis(config.scheduler.record_delay_ms),
            tiers: config.tiers.clone(),
            llm: config.llm.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contactscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contactscout/contactscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ScoutError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ScoutError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| ScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the LLM API key env var is set and non-empty, returning it.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ScoutError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}
