//! Candidate page retrieval through the session pool.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use contactscout_shared::{PageContent, Result, ScoutError};

use crate::pool::BrowserSessionPool;
use crate::session::BrowserSession;

/// Retrieves the visible text of one candidate URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<PageContent>;
}

/// [`PageFetcher`] that borrows one pooled session per page.
pub struct PooledPageFetcher {
    pool: BrowserSessionPool,
    timeout: Duration,
}

impl PooledPageFetcher {
    pub fn new(pool: BrowserSessionPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl PageFetcher for PooledPageFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        let mut lease = self.pool.acquire().await?;
        let outcome = tokio::time::timeout(self.timeout, load_text(&mut *lease, url)).await;
        lease.release().await;

        let text = match outcome {
            Ok(text) => text?,
            Err(_) => {
                return Err(ScoutError::FetchTimeout {
                    url: url.to_string(),
                    waited_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        if text.trim().is_empty() {
            return Err(ScoutError::fetch(url.as_str(), "page has no visible text"));
        }

        let page = PageContent::new(url.clone(), text);
        debug!(chars = page.text.len(), digest = %page.digest, "page fetched");
        Ok(page)
    }
}

async fn load_text(session: &mut dyn BrowserSession, url: &Url) -> Result<String> {
    session.navigate(url).await?;
    session.extract_text().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::FakeProvider;
    use contactscout_shared::compute_digest;

    fn fetcher(provider: &FakeProvider, timeout: Duration) -> (BrowserSessionPool, PooledPageFetcher) {
        let pool =
            BrowserSessionPool::new(Arc::new(provider.clone()), 2, Duration::from_secs(1)).unwrap();
        (pool.clone(), PooledPageFetcher::new(pool, timeout))
    }

    #[tokio::test]
    async fn fetch_returns_text_with_digest() {
        let provider = FakeProvider::new().with_page(
            "https://www.doximity.com/pub/jane-doe",
            "Jane Doe, MD\nPhone: 617-555-0100",
        );
        let (pool, fetcher) = fetcher(&provider, Duration::from_secs(5));

        let url = Url::parse("https://www.doximity.com/pub/jane-doe").unwrap();
        let page = fetcher.fetch(&url).await.unwrap();
        assert_eq!(page.url, url);
        assert_eq!(page.digest, compute_digest("Jane Doe, MD\nPhone: 617-555-0100"));
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn unreachable_page_is_a_recoverable_fetch_error() {
        let provider = FakeProvider::new();
        let (pool, fetcher) = fetcher(&provider, Duration::from_secs(5));

        let err = fetcher
            .fetch(&Url::parse("https://missing.example/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::FetchError { .. }));
        assert!(err.is_recoverable());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn blank_page_is_a_fetch_error() {
        let provider = FakeProvider::new().with_page("https://blank.example/", "   ");
        let (_pool, fetcher) = fetcher(&provider, Duration::from_secs(5));

        let err = fetcher
            .fetch(&Url::parse("https://blank.example/").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no visible text"));
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let provider = FakeProvider::new()
            .with_page("https://slow.example/", "eventually")
            .with_delay(Duration::from_secs(5));
        let (pool, fetcher) = fetcher(&provider, Duration::from_millis(30));

        let err = fetcher
            .fetch(&Url::parse("https://slow.example/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::FetchTimeout { .. }));
        assert_eq!(pool.in_use(), 0);
    }
}
