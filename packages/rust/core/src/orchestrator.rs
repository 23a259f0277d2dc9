//! Per-record retrieval state machine.
//!
//! ```text
//! BuildQuery(t) -> Search -> Fetch -> Extract -> Verify -> Decide
//!       ^                                                   |
//!       +------------------ AdvanceTier(t+1) <--------------+--> Finalize
//! ```
//!
//! Tiers run strictly in order. Inside a tier each phase is a barrier, and
//! the candidates of a phase run concurrently; the session pool is what
//! actually bounds browser work. Failures of a single candidate are written
//! to the audit trail and absorbed; only provider outages escalate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use contactscout_browser::{PageFetcher, SearchExecutor};
use contactscout_llm::{ExtractionClient, VerificationClient};
use contactscout_shared::{
    AuditOutcome, AuditTrail, DelayRange, DenyList, Evidence, ExtractedContact, InputRecord, PageContent,
    PipelineConfig, Result, RetrievalResult, ScoutError, SearchCandidate, Termination, TierQuery,
    TierSummary, VerificationOutcome,
};

use crate::decision::{Decision, ScoredCandidate, decide, select_best};
use crate::planner::QueryTierPlanner;

const BUDGET_REASON: &str = "record time budget exhausted";

/// Knobs for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub confidence_threshold: u8,
    /// Candidates of one phase in flight at once.
    pub candidate_concurrency: usize,
    /// Wall-clock limit for a whole record.
    pub record_budget: Duration,
    pub deny_list: DenyList,
    /// Pause before each tier after the first.
    pub tier_delay: DelayRange,
}

impl OrchestratorSettings {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            candidate_concurrency: config.max_results_per_record,
            record_budget: config.record_budget,
            deny_list: config.deny_list.clone(),
            tier_delay: config.tier_delay,
        }
    }
}

/// The collaborators one record run needs.
pub struct RetrievalOrchestrator {
    planner: QueryTierPlanner,
    search: Arc<dyn SearchExecutor>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ExtractionClient>,
    verifier: Arc<dyn VerificationClient>,
    settings: OrchestratorSettings,
}

enum State {
    BuildQuery(u8),
    Search(TierQuery),
    Fetch {
        tier: u8,
        candidates: Vec<SearchCandidate>,
    },
    Extract {
        tier: u8,
        pages: Vec<(usize, PageContent)>,
    },
    Verify {
        tier: u8,
        contacts: Vec<(usize, ExtractedContact, PageContent)>,
    },
    Decide {
        tier: u8,
        best: Option<ScoredCandidate>,
    },
    AdvanceTier(u8),
    Finalize(Finish),
}

enum Finish {
    Found(Evidence),
    NotFound(Termination),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::BuildQuery(_) => "build_query",
            State::Search(_) => "search",
            State::Fetch { .. } => "fetch",
            State::Extract { .. } => "extract",
            State::Verify { .. } => "verify",
            State::Decide { .. } => "decide",
            State::AdvanceTier(_) => "advance_tier",
            State::Finalize(_) => "finalize",
        }
    }
}

/// Finished items, and whether all of them finished before the deadline.
type PhaseOutput<T> = (Vec<T>, bool);

impl RetrievalOrchestrator {
    pub fn new(
        planner: QueryTierPlanner,
        search: Arc<dyn SearchExecutor>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ExtractionClient>,
        verifier: Arc<dyn VerificationClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            planner,
            search,
            fetcher,
            extractor,
            verifier,
            settings,
        }
    }

    pub fn planner(&self) -> &QueryTierPlanner {
        &self.planner
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Drive one record to its terminal result.
    ///
    /// Fails fast with [`ScoutError::InvalidRecord`] before any network call,
    /// returns [`ScoutError::Cancelled`] when `cancel` fires, and
    /// [`ScoutError::ProviderUnavailable`] when a provider is unusable.
    #[instrument(skip_all, fields(record_id = %record.id))]
    pub async fn run(
        &self,
        record: &InputRecord,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        record.validate()?;
        let deadline = Instant::now() + self.settings.record_budget;
        let mut trail = AuditTrail::new(record.id.clone());
        let mut state = State::BuildQuery(1);

        loop {
            if cancel.is_cancelled() {
                info!("record cancelled");
                return Err(ScoutError::Cancelled);
            }
            let over_budget = Instant::now() >= deadline;
            debug!(state = state.name(), "transition");

            state = match state {
                State::Finalize(finish) => return self.finalize(trail, finish),

                State::Decide { tier, best } => self.conclude_tier(&mut trail, tier, best),

                _ if over_budget => {
                    warn!(tier = trail.last_tier, "record budget exhausted");
                    State::Finalize(Finish::NotFound(Termination::BudgetExhausted))
                }

                State::BuildQuery(tier) => {
                    trail.last_tier = tier;
                    match self.planner.plan(record, tier) {
                        Some(query) => State::Search(query),
                        None => State::Finalize(Finish::NotFound(Termination::TiersExhausted)),
                    }
                }

                State::Search(query) => self.search_tier(&mut trail, query, deadline, cancel).await?,

                State::Fetch { tier, candidates } => {
                    self.fetch_pages(&mut trail, tier, candidates, deadline, cancel)
                        .await?
                }

                State::Extract { tier, pages } => {
                    self.extract_contacts(&mut trail, record, tier, pages, deadline, cancel)
                        .await?
                }

                State::Verify { tier, contacts } => {
                    self.verify_contacts(&mut trail, record, tier, contacts, deadline, cancel)
                        .await?
                }

                State::AdvanceTier(next) => {
                    let pause = self.settings.tier_delay.sample();
                    info!(
                        tier = next,
                        pause_ms = pause.as_millis() as u64,
                        "advancing to next tier"
                    );
                    // The pause never outlives the record budget.
                    let until = (Instant::now() + pause).min(deadline);
                    guarded(cancel, async {
                        tokio::time::sleep_until(until).await;
                        Ok(())
                    })
                    .await?;
                    State::BuildQuery(next)
                }
            };
        }
    }

    async fn search_tier(
        &self,
        trail: &mut AuditTrail,
        query: TierQuery,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let tier = query.rank;
        let searched =
            tokio::time::timeout_at(deadline, guarded(cancel, self.search.search(&query))).await;

        let mut summary = TierSummary {
            rank: tier,
            query: query.query.clone(),
            candidates: 0,
            best_confidence: None,
            search_error: None,
        };

        let candidates = match searched {
            Err(_) => {
                summary.search_error = Some(BUDGET_REASON.into());
                trail.tiers.push(summary);
                return Ok(State::Finalize(Finish::NotFound(Termination::BudgetExhausted)));
            }
            Ok(Ok(result)) => result.candidates,
            Ok(Err(e)) if e.is_recoverable() => {
                warn!(tier, error = %e, "search failed, tier yields no candidates");
                summary.search_error = Some(e.to_string());
                Vec::new()
            }
            Ok(Err(e)) => return Err(e),
        };

        let candidates: Vec<SearchCandidate> = candidates
            .into_iter()
            .filter(|c| !self.settings.deny_list.is_denied(&c.url))
            .collect();
        summary.candidates = candidates.len();
        trail.tiers.push(summary);
        info!(tier, candidates = candidates.len(), "search complete");

        Ok(State::Fetch { tier, candidates })
    }

    async fn fetch_pages(
        &self,
        trail: &mut AuditTrail,
        tier: u8,
        mut candidates: Vec<SearchCandidate>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<State> {
        candidates.sort_by_key(|c| c.rank);
        trail
            .visited_urls
            .extend(candidates.iter().map(|c| c.url.to_string()));

        let fetcher = self.fetcher.as_ref();
        let (done, complete) = self
            .run_phase(candidates.clone(), deadline, |c: SearchCandidate| async move {
                let fetched = guarded(cancel, fetcher.fetch(&c.url)).await;
                (c, fetched)
            })
            .await;

        let mut pages = Vec::new();
        let mut attempted = Vec::with_capacity(done.len());
        for (candidate, fetched) in done {
            attempted.push(candidate.rank);
            match fetched {
                Ok(page) => pages.push((candidate.rank, page)),
                Err(e) if e.is_recoverable() => {
                    debug!(url = %candidate.url, error = %e, "candidate skipped");
                    trail.record(
                        tier,
                        candidate.rank,
                        &candidate.url,
                        AuditOutcome::FetchFailed {
                            reason: e.to_string(),
                        },
                        None,
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if !complete {
            for c in candidates.iter().filter(|c| !attempted.contains(&c.rank)) {
                trail.record(
                    tier,
                    c.rank,
                    &c.url,
                    AuditOutcome::FetchFailed {
                        reason: BUDGET_REASON.into(),
                    },
                    None,
                );
            }
            for (rank, page) in &pages {
                trail.record(
                    tier,
                    *rank,
                    &page.url,
                    AuditOutcome::ExtractionFailed {
                        reason: BUDGET_REASON.into(),
                    },
                    Some(page.digest.as_str()),
                );
            }
            return Ok(State::Finalize(Finish::NotFound(Termination::BudgetExhausted)));
        }

        info!(tier, pages = pages.len(), "fetch complete");
        Ok(State::Extract { tier, pages })
    }

    async fn extract_contacts(
        &self,
        trail: &mut AuditTrail,
        record: &InputRecord,
        tier: u8,
        pages: Vec<(usize, PageContent)>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let extractor = self.extractor.as_ref();
        let expected: Vec<(usize, Url, String)> = pages
            .iter()
            .map(|(rank, page)| (*rank, page.url.clone(), page.digest.clone()))
            .collect();

        let (done, complete) = self
            .run_phase(pages, deadline, |(rank, page): (usize, PageContent)| async move {
                let extracted = guarded(cancel, extractor.extract(record, &page)).await;
                (rank, page, extracted)
            })
            .await;

        let mut contacts = Vec::new();
        let mut attempted = Vec::with_capacity(done.len());
        for (rank, page, extracted) in done {
            attempted.push(rank);
            match extracted {
                Ok(contact) if contact.has_any_field() => contacts.push((rank, contact, page)),
                Ok(_) => trail.record(
                    tier,
                    rank,
                    &page.url,
                    AuditOutcome::NoContact,
                    Some(page.digest.as_str()),
                ),
                Err(e) if e.is_recoverable() => trail.record(
                    tier,
                    rank,
                    &page.url,
                    AuditOutcome::ExtractionFailed {
                        reason: e.to_string(),
                    },
                    Some(page.digest.as_str()),
                ),
                Err(e) => return Err(e),
            }
        }

        if !complete {
            for (rank, url, digest) in expected.iter().filter(|(r, ..)| !attempted.contains(r)) {
                trail.record(
                    tier,
                    *rank,
                    url,
                    AuditOutcome::ExtractionFailed {
                        reason: BUDGET_REASON.into(),
                    },
                    Some(digest.as_str()),
                );
            }
            for (rank, _, page) in &contacts {
                trail.record(
                    tier,
                    *rank,
                    &page.url,
                    AuditOutcome::VerificationFailed {
                        reason: BUDGET_REASON.into(),
                    },
                    Some(page.digest.as_str()),
                );
            }
            return Ok(State::Finalize(Finish::NotFound(Termination::BudgetExhausted)));
        }

        info!(tier, contacts = contacts.len(), "extraction complete");
        Ok(State::Verify { tier, contacts })
    }

    async fn verify_contacts(
        &self,
        trail: &mut AuditTrail,
        record: &InputRecord,
        tier: u8,
        contacts: Vec<(usize, ExtractedContact, PageContent)>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let verifier = self.verifier.as_ref();
        let expected: Vec<(usize, Url, String)> = contacts
            .iter()
            .map(|(rank, _, page)| (*rank, page.url.clone(), page.digest.clone()))
            .collect();

        let (done, complete) = self
            .run_phase(
                contacts,
                deadline,
                |(rank, contact, page): (usize, ExtractedContact, PageContent)| async move {
                    let verified = guarded(cancel, verifier.verify(record, &contact, &page)).await;
                    (rank, contact, page, verified)
                },
            )
            .await;

        let mut scored = Vec::new();
        let mut attempted = Vec::with_capacity(done.len());
        for (rank, contact, page, verified) in done {
            attempted.push(rank);
            match verified {
                Ok(outcome) => {
                    debug!(url = %page.url, confidence = outcome.confidence, "candidate scored");
                    trail.record(tier, rank, &page.url, audit_verified(&outcome), Some(page.digest.as_str()));
                    scored.push(ScoredCandidate {
                        rank,
                        contact,
                        outcome,
                    });
                }
                Err(e) if e.is_recoverable() => trail.record(
                    tier,
                    rank,
                    &page.url,
                    AuditOutcome::VerificationFailed {
                        reason: e.to_string(),
                    },
                    Some(page.digest.as_str()),
                ),
                Err(e) => return Err(e),
            }
        }

        let best = select_best(scored);
        if !complete {
            for (rank, url, digest) in expected.iter().filter(|(r, ..)| !attempted.contains(r)) {
                trail.record(
                    tier,
                    *rank,
                    url,
                    AuditOutcome::VerificationFailed {
                        reason: BUDGET_REASON.into(),
                    },
                    Some(digest.as_str()),
                );
            }
            // A candidate that already cleared the bar still counts.
            let accepted = best
                .as_ref()
                .is_some_and(|b| b.outcome.confidence >= self.settings.confidence_threshold);
            if !accepted {
                return Ok(State::Finalize(Finish::NotFound(Termination::BudgetExhausted)));
            }
        }

        Ok(State::Decide { tier, best })
    }

    fn conclude_tier(&self, trail: &mut AuditTrail, tier: u8, best: Option<ScoredCandidate>) -> State {
        if let Some(summary) = trail.tiers.iter_mut().rev().find(|s| s.rank == tier) {
            summary.best_confidence = best.as_ref().map(|b| b.outcome.confidence);
        }

        let threshold = self.settings.confidence_threshold;
        match decide(best.as_ref(), threshold, tier, self.planner.tier_count()) {
            Decision::Accept => {
                let Some(best) = best else {
                    return State::Finalize(Finish::NotFound(Termination::TiersExhausted));
                };
                info!(
                    tier,
                    confidence = best.outcome.confidence,
                    url = %best.contact.source_url,
                    "candidate accepted"
                );
                State::Finalize(Finish::Found(Evidence {
                    contact: best.contact,
                    outcome: best.outcome,
                    tier,
                }))
            }
            Decision::Advance { next } => {
                debug!(
                    tier,
                    best = best.as_ref().map(|b| b.outcome.confidence),
                    threshold,
                    "below threshold"
                );
                State::AdvanceTier(next)
            }
            Decision::Exhausted => {
                info!(tier, "all tiers exhausted");
                State::Finalize(Finish::NotFound(Termination::TiersExhausted))
            }
        }
    }

    fn finalize(&self, trail: AuditTrail, finish: Finish) -> Result<RetrievalResult> {
        let result = match finish {
            Finish::Found(evidence) => {
                RetrievalResult::found(trail, evidence, self.settings.confidence_threshold)?
            }
            Finish::NotFound(termination) => RetrievalResult::not_found(trail, termination),
        };
        info!(
            status = ?result.status(),
            tier = result.tier(),
            visited = result.visited_urls().len(),
            "record finished"
        );
        Ok(result)
    }

    /// Run `work` over `items` concurrently until all finish or the deadline
    /// passes. Returns what finished and whether everything did.
    async fn run_phase<I, T, F, Fut>(&self, items: Vec<I>, deadline: Instant, work: F) -> PhaseOutput<T>
    where
        F: FnMut(I) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut done = Vec::with_capacity(items.len());
        let mut in_flight = stream::iter(items)
            .map(work)
            .buffer_unordered(self.settings.candidate_concurrency.max(1));

        let complete = tokio::time::timeout_at(deadline, async {
            while let Some(item) = in_flight.next().await {
                done.push(item);
            }
        })
        .await
        .is_ok();

        (done, complete)
    }
}

fn audit_verified(outcome: &VerificationOutcome) -> AuditOutcome {
    AuditOutcome::Verified {
        confidence: outcome.confidence,
        plausible_match: outcome.plausible_match,
    }
}

/// Race `call` against cancellation, checking the token on both sides.
async fn guarded<T>(cancel: &CancellationToken, call: impl Future<Output = Result<T>>) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(ScoutError::Cancelled);
    }
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ScoutError::Cancelled),
        outcome = call => outcome,
    };
    if cancel.is_cancelled() {
        return Err(ScoutError::Cancelled);
    }
    outcome
}
