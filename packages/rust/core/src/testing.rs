//! In-memory stand-ins for the search, fetch, and model contracts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use contactscout_browser::{BrowserSession, PageFetcher, SearchExecutor, SearchHit, SessionProvider};
use contactscout_llm::{ExtractionClient, VerificationClient};
use contactscout_shared::{
    ExtractedContact, InputRecord, PageContent, Result, ScoutError, SearchCandidate, SearchResult,
    TierQuery, VerificationOutcome,
};

enum TierScript {
    Urls(Vec<String>),
    Timeout,
}

/// Search fake keyed by tier rank. Unknown tiers return no results.
#[derive(Default)]
pub struct FakeSearch {
    tiers: HashMap<u8, TierScript>,
    unavailable: bool,
    pub calls: Mutex<Vec<u8>>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, rank: u8, urls: &[&str]) -> Self {
        self.tiers
            .insert(rank, TierScript::Urls(urls.iter().map(|u| u.to_string()).collect()));
        self
    }

    pub fn tier_times_out(mut self, rank: u8) -> Self {
        self.tiers.insert(rank, TierScript::Timeout);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn calls(&self) -> Vec<u8> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchExecutor for FakeSearch {
    async fn search(&self, tier: &TierQuery) -> Result<SearchResult> {
        self.calls.lock().unwrap().push(tier.rank);
        if self.unavailable {
            return Err(ScoutError::ProviderUnavailable("search provider down".into()));
        }
        let urls = match self.tiers.get(&tier.rank) {
            Some(TierScript::Urls(urls)) => urls.clone(),
            Some(TierScript::Timeout) => {
                return Err(ScoutError::SearchTimeout {
                    query: tier.query.clone(),
                    waited_ms: 30_000,
                });
            }
            None => Vec::new(),
        };
        let candidates = urls
            .iter()
            .enumerate()
            .map(|(i, u)| SearchCandidate {
                rank: i + 1,
                url: Url::parse(u).unwrap(),
            })
            .collect();
        Ok(SearchResult {
            tier: tier.rank,
            query: tier.query.clone(),
            candidates,
        })
    }
}

/// Fetch fake: known URLs return their text, others fail with a 404.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    pub fn slow(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        match self.pages.get(url.as_str()) {
            Some(text) => Ok(PageContent::new(url.clone(), text.clone())),
            None => Err(ScoutError::fetch(url.as_str(), "HTTP 404 Not Found")),
        }
    }
}

/// Extraction fake: scripted contacts per URL, empty contact otherwise.
#[derive(Default)]
pub struct FakeExtractor {
    phones: HashMap<String, String>,
    addresses: HashMap<String, String>,
    failing: HashSet<String>,
    unavailable: bool,
    pub calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phone(mut self, url: &str, phone: &str) -> Self {
        self.phones.insert(url.to_string(), phone.to_string());
        self
    }

    pub fn address_only(mut self, url: &str, address: &str) -> Self {
        self.addresses.insert(url.to_string(), address.to_string());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait]
impl ExtractionClient for FakeExtractor {
    async fn extract(&self, _record: &InputRecord, page: &PageContent) -> Result<ExtractedContact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = page.url.as_str();
        if self.unavailable {
            return Err(ScoutError::ProviderUnavailable("extract: HTTP 401".into()));
        }
        if self.failing.contains(url) {
            return Err(ScoutError::ModelCallFailure {
                operation: "extract".into(),
                attempts: 3,
                message: "HTTP 429".into(),
            });
        }
        Ok(ExtractedContact {
            phone: self.phones.get(url).cloned(),
            email: None,
            address: self.addresses.get(url).cloned(),
            source_url: url.to_string(),
        })
    }
}

/// Verification fake: scripted confidence per source URL, 0 otherwise.
#[derive(Default)]
pub struct FakeVerifier {
    scores: HashMap<String, u8>,
    pub calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(mut self, url: &str, confidence: u8) -> Self {
        self.scores.insert(url.to_string(), confidence);
        self
    }
}

#[async_trait]
impl VerificationClient for FakeVerifier {
    async fn verify(
        &self,
        _record: &InputRecord,
        contact: &ExtractedContact,
        _page: &PageContent,
    ) -> Result<VerificationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let confidence = self.scores.get(&contact.source_url).copied().unwrap_or(0);
        Ok(VerificationOutcome::new(
            confidence,
            confidence >= 50,
            format!("scripted score {confidence}"),
        ))
    }
}

/// Browser provider whose sessions return fixed hits and answer every
/// navigation slowly.
#[derive(Clone)]
pub struct SlowProvider {
    pub hits: Vec<String>,
    pub navigate_delay: Duration,
    pub resets: Arc<AtomicUsize>,
}

impl SessionProvider for SlowProvider {
    fn open(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(SlowSession {
            provider: self.clone(),
            loaded: false,
        }))
    }
}

struct SlowSession {
    provider: SlowProvider,
    loaded: bool,
}

#[async_trait]
impl BrowserSession for SlowSession {
    async fn search(&mut self, _query: &str) -> Result<Vec<SearchHit>> {
        Ok(self
            .provider
            .hits
            .iter()
            .map(|u| SearchHit {
                url: Url::parse(u).unwrap(),
                title: String::new(),
            })
            .collect())
    }

    async fn navigate(&mut self, _url: &Url) -> Result<()> {
        tokio::time::sleep(self.provider.navigate_delay).await;
        self.loaded = true;
        Ok(())
    }

    async fn extract_text(&mut self) -> Result<String> {
        Ok(if self.loaded { "Jane Doe, MD".into() } else { String::new() })
    }

    async fn reset(&mut self) -> Result<()> {
        self.loaded = false;
        self.provider.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
