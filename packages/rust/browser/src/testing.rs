//! Scripted in-memory sessions for pool, search, and fetch tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use contactscout_shared::{Result, ScoutError};

use crate::session::{BrowserSession, SearchHit, SessionProvider};

#[derive(Debug, Default)]
pub struct FakeStats {
    pub opened: AtomicUsize,
    pub resets: AtomicUsize,
    pub searches: AtomicUsize,
    pub navigations: AtomicUsize,
}

#[derive(Default)]
struct Script {
    results: HashMap<String, Vec<String>>,
    pages: HashMap<String, String>,
    delay: Duration,
    fail_reset: bool,
}

#[derive(Clone, Default)]
pub struct FakeProvider {
    script: Arc<Script>,
    stats: Arc<FakeStats>,
    fail_open: Arc<AtomicBool>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("configure the fake before sharing it")
    }

    pub fn with_results(mut self, query: &str, urls: &[&str]) -> Self {
        self.script_mut()
            .results
            .insert(query.to_string(), urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.script_mut()
            .pages
            .insert(url.to_string(), text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script_mut().delay = delay;
        self
    }

    pub fn with_failing_reset(mut self) -> Self {
        self.script_mut().fail_reset = true;
        self
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &FakeStats {
        &self.stats
    }
}

impl SessionProvider for FakeProvider {
    fn open(&self) -> Result<Box<dyn BrowserSession>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ScoutError::ProviderUnavailable("browser refused to start".into()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            stats: self.stats.clone(),
            current: None,
        }))
    }
}

struct FakeSession {
    script: Arc<Script>,
    stats: Arc<FakeStats>,
    current: Option<String>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn search(&mut self, query: &str) -> Result<Vec<SearchHit>> {
        self.stats.searches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.script.delay).await;
        let urls = self.script.results.get(query).cloned().unwrap_or_default();
        urls.iter()
            .map(|u| {
                let url = Url::parse(u).map_err(|e| ScoutError::parse(e.to_string()))?;
                Ok(SearchHit {
                    url,
                    title: String::new(),
                })
            })
            .collect()
    }

    async fn navigate(&mut self, url: &Url) -> Result<()> {
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.script.delay).await;
        if !self.script.pages.contains_key(url.as_str()) {
            return Err(ScoutError::fetch(url.as_str(), "HTTP 404 Not Found"));
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn extract_text(&mut self) -> Result<String> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| ScoutError::fetch("about:blank", "no page loaded"))?;
        Ok(self.script.pages.get(current).cloned().unwrap_or_default())
    }

    async fn reset(&mut self) -> Result<()> {
        self.current = None;
        if self.script.fail_reset {
            return Err(ScoutError::Network("browser crashed during reset".into()));
        }
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
