//! Pipeline assembly: wires the session pool, model clients, orchestrator,
//! and scheduler from one [`PipelineConfig`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument};

use contactscout_browser::{
    BrowserSessionPool, HttpSessionProvider, HttpSessionSettings, PooledPageFetcher,
    PooledSearchExecutor,
};
use contactscout_llm::{LlmExtractionClient, LlmVerificationClient, OpenAiCompatClient, RetryPolicy};
use contactscout_shared::{InputRecord, PipelineConfig, Result, ScoutError};

use crate::orchestrator::{OrchestratorSettings, RetrievalOrchestrator};
use crate::planner::QueryTierPlanner;
use crate::scheduler::{BatchCancel, BatchProgress, ConcurrencyScheduler};
use crate::sink::ResultSink;
use crate::stats::BatchReport;

/// A fully wired contact retrieval pipeline.
pub struct Pipeline {
    pool: BrowserSessionPool,
    orchestrator: Arc<RetrievalOrchestrator>,
    scheduler: ConcurrencyScheduler,
}

impl Pipeline {
    /// Build every component from `config`, using `api_key` for the model
    /// provider.
    pub fn build(config: &PipelineConfig, api_key: String) -> Result<Self> {
        Self::with_session_settings(config, HttpSessionSettings::from_pipeline(config), api_key)
    }

    /// Like [`Pipeline::build`], with explicit HTTP session settings.
    #[instrument(skip_all, fields(pool = config.pool_capacity, model = %config.llm.model))]
    pub fn with_session_settings(
        config: &PipelineConfig,
        session: HttpSessionSettings,
        api_key: String,
    ) -> Result<Self> {
        let pool = BrowserSessionPool::new(
            Arc::new(HttpSessionProvider::new(session)),
            config.pool_capacity,
            config.acquire_timeout,
        )?;

        let search = PooledSearchExecutor::new(
            pool.clone(),
            config.deny_list.clone(),
            config.max_results_per_record,
            config.search_timeout,
        );
        let fetcher = PooledPageFetcher::new(pool.clone(), config.page_timeout);

        let chat = Arc::new(OpenAiCompatClient::new(&config.llm, api_key)?);
        let retry = RetryPolicy::from_config(&config.llm);
        let extractor =
            LlmExtractionClient::new(chat.clone(), retry.clone(), config.llm.max_input_chars);
        let verifier = LlmVerificationClient::new(chat, retry, config.llm.max_input_chars);

        let orchestrator = Arc::new(RetrievalOrchestrator::new(
            QueryTierPlanner::new(config.tiers.clone())?,
            Arc::new(search),
            Arc::new(fetcher),
            Arc::new(extractor),
            Arc::new(verifier),
            OrchestratorSettings::from_pipeline(config),
        ));
        let scheduler =
            ConcurrencyScheduler::new(orchestrator.clone(), config.parallelism, config.pool_capacity)
                .with_record_delay(config.record_delay);

        info!(
            parallelism = scheduler.parallelism(),
            tiers = config.tiers.len(),
            tier_delay_ms = config.tier_delay.max().as_millis() as u64,
            record_delay_ms = config.record_delay.max().as_millis() as u64,
            "pipeline ready"
        );

        Ok(Self {
            pool,
            orchestrator,
            scheduler,
        })
    }

    pub fn pool(&self) -> &BrowserSessionPool {
        &self.pool
    }

    pub fn orchestrator(&self) -> &Arc<RetrievalOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &ConcurrencyScheduler {
        &self.scheduler
    }

    /// Run a batch to completion.
    pub async fn run(
        &self,
        records: Vec<InputRecord>,
        sink: &dyn ResultSink,
        progress: &dyn BatchProgress,
        cancel: &BatchCancel,
    ) -> BatchReport {
        let report = self.scheduler.run(records, sink, progress, cancel).await;
        info!(
            peak_sessions = self.pool.peak_in_use(),
            lost_sessions = self.pool.lost(),
            "pool usage"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Record source
// ---------------------------------------------------------------------------

/// One row of the input file. Either `name` or the split name columns.
#[derive(Debug, Deserialize)]
struct RecordRow {
    id: RowId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    middle_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default, alias = "specialty")]
    title: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

/// Spreadsheet exports carry numeric ids as often as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowId {
    Text(String),
    Number(serde_json::Number),
}

impl RecordRow {
    fn into_record(self) -> InputRecord {
        let id = match self.id {
            RowId::Text(s) => s,
            RowId::Number(n) => n.to_string(),
        };
        let mut record = match self.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => InputRecord::new(id, name),
            None => InputRecord::from_name_parts(
                id,
                self.first_name.as_deref().unwrap_or(""),
                self.middle_name.as_deref().unwrap_or(""),
                self.last_name.as_deref().unwrap_or(""),
            ),
        };
        let present = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        record.title = present(self.title);
        record.city = present(self.city);
        record.state = present(self.state);
        record.address = present(self.address);
        record
    }
}

/// Read input records from a JSON array file.
pub async fn load_records(path: &Path) -> Result<Vec<InputRecord>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ScoutError::io(path, e))?;
    let records = parse_records(&content)?;
    info!(path = %path.display(), count = records.len(), "records loaded");
    Ok(records)
}

/// Parse a JSON array of records. Record ids must be unique.
///
/// Records are not validated here; sparse records fail individually when
/// they run.
pub fn parse_records(json: &str) -> Result<Vec<InputRecord>> {
    let rows: Vec<RecordRow> = serde_json::from_str(json)
        .map_err(|e| ScoutError::parse(format!("invalid record file: {e}")))?;

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let record = row.into_record();
        if record.id.trim().is_empty() {
            return Err(ScoutError::parse("record with an empty id"));
        }
        if !seen.insert(record.id.clone()) {
            return Err(ScoutError::parse(format!("duplicate record id {:?}", record.id)));
        }
        records.push(record);
    }
    Ok(records)
}
