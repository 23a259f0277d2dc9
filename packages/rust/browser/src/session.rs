//! Session contract for search/browse providers.

use async_trait::async_trait;
use url::Url;

use contactscout_shared::Result;

/// One organic result from a search page, in engine order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: Url,
    pub title: String,
}

/// A headless browsing context that can be reused across records.
///
/// Sessions are only reachable through a [`crate::BrowserSessionPool`] lease.
#[async_trait]
pub trait BrowserSession: Send {
    /// Run a search and return result links in the engine's order.
    async fn search(&mut self, query: &str) -> Result<Vec<SearchHit>>;

    /// Load `url` as the current page, skipping non-text resources.
    async fn navigate(&mut self, url: &Url) -> Result<()>;

    /// Visible text of the current page.
    async fn extract_text(&mut self) -> Result<String>;

    /// Return to a neutral state: no current page, no history, no cookies.
    async fn reset(&mut self) -> Result<()>;
}

/// Opens fresh sessions for the pool.
pub trait SessionProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn BrowserSession>>;
}
