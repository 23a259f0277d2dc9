//! Tier searches through the session pool.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use contactscout_shared::{DenyList, Result, ScoutError, SearchCandidate, SearchResult, TierQuery};

use crate::pool::BrowserSessionPool;
use crate::session::SearchHit;

/// Runs one tier's query and returns ranked candidate URLs.
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    async fn search(&self, tier: &TierQuery) -> Result<SearchResult>;
}

/// [`SearchExecutor`] that borrows one pooled session per call.
pub struct PooledSearchExecutor {
    pool: BrowserSessionPool,
    deny_list: DenyList,
    max_results: usize,
    timeout: Duration,
}

impl PooledSearchExecutor {
    pub fn new(
        pool: BrowserSessionPool,
        deny_list: DenyList,
        max_results: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            deny_list,
            max_results,
            timeout,
        }
    }
}

#[async_trait]
impl SearchExecutor for PooledSearchExecutor {
    #[instrument(skip_all, fields(tier = tier.rank, query = %tier.query))]
    async fn search(&self, tier: &TierQuery) -> Result<SearchResult> {
        let mut lease = self.pool.acquire().await?;
        let outcome = tokio::time::timeout(self.timeout, lease.search(&tier.query)).await;
        lease.release().await;

        let hits = match outcome {
            Ok(hits) => hits?,
            Err(_) => {
                return Err(ScoutError::SearchTimeout {
                    query: tier.query.clone(),
                    waited_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let raw = hits.len();
        let candidates = rank_candidates(hits, &self.deny_list, self.max_results);
        info!(raw, kept = candidates.len(), "search complete");

        Ok(SearchResult {
            tier: tier.rank,
            query: tier.query.clone(),
            candidates,
        })
    }
}

/// Drop deny-listed and repeated URLs, keep engine order, and cap the list.
///
/// Ranks are 1-based positions in the filtered list.
pub fn rank_candidates(
    hits: Vec<SearchHit>,
    deny_list: &DenyList,
    max_results: usize,
) -> Vec<SearchCandidate> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| {
            if deny_list.is_denied(&hit.url) {
                debug!(url = %hit.url, "deny-listed result dropped");
                return false;
            }
            seen.insert(hit.url.to_string())
        })
        .take(max_results)
        .enumerate()
        .map(|(i, hit)| SearchCandidate {
            rank: i + 1,
            url: hit.url,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use url::Url;

    use super::*;
    use crate::testing::FakeProvider;
    use contactscout_shared::DomainPolicy;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: Url::parse(url).unwrap(),
            title: String::new(),
        }
    }

    fn tier(query: &str) -> TierQuery {
        TierQuery {
            rank: 2,
            query: query.to_string(),
            policy: DomainPolicy::Unrestricted,
        }
    }

    #[test]
    fn rank_candidates_filters_then_truncates() {
        let deny = DenyList::new(["facebook.com", "linkedin.com"]);
        let hits = vec![
            hit("https://www.facebook.com/jane.doe"),
            hit("https://a.example/1"),
            hit("https://www.linkedin.com/in/janedoe"),
            hit("https://a.example/1"),
            hit("https://b.example/2"),
            hit("https://c.example/3"),
        ];

        let ranked = rank_candidates(hits, &deny, 2);
        let urls: Vec<_> = ranked.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/1", "https://b.example/2"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    #[tokio::test]
    async fn pooled_search_returns_session_to_pool() {
        let provider = FakeProvider::new().with_results(
            "Jane Doe Boston",
            &[
                "https://twitter.com/janedoe",
                "https://www.npiprofile.com/npi/1234",
                "https://www.doximity.com/pub/jane-doe",
            ],
        );
        let pool =
            BrowserSessionPool::new(Arc::new(provider.clone()), 1, Duration::from_secs(1)).unwrap();
        let executor = PooledSearchExecutor::new(
            pool.clone(),
            DenyList::new(["twitter.com"]),
            5,
            Duration::from_secs(5),
        );

        let result = executor.search(&tier("Jane Doe Boston")).await.unwrap();
        assert_eq!(result.tier, 2);
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(
            result.candidates[0].url.as_str(),
            "https://www.npiprofile.com/npi/1234"
        );
        assert_eq!(pool.in_use(), 0);
        assert_eq!(provider.stats().resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn search_timeout_releases_session() {
        let provider = FakeProvider::new().with_delay(Duration::from_secs(5));
        let pool =
            BrowserSessionPool::new(Arc::new(provider.clone()), 1, Duration::from_secs(1)).unwrap();
        let executor =
            PooledSearchExecutor::new(pool.clone(), DenyList::default(), 5, Duration::from_millis(30));

        let err = executor.search(&tier("slow")).await.unwrap_err();
        assert!(matches!(err, ScoutError::SearchTimeout { .. }));
        assert!(err.is_recoverable());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn empty_results_are_not_an_error() {
        let provider = FakeProvider::new();
        let pool = BrowserSessionPool::new(Arc::new(provider), 1, Duration::from_secs(1)).unwrap();
        let executor =
            PooledSearchExecutor::new(pool, DenyList::default(), 5, Duration::from_secs(1));

        let result = executor.search(&tier("nobody")).await.unwrap();
        assert!(result.candidates.is_empty());
    }
}
