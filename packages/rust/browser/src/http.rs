//! HTTP-backed browsing session.
//!
//! Each session owns a `reqwest` client with a private cookie jar. Only the
//! requested document is loaded; sub-resources (images, stylesheets, fonts,
//! media) are never requested, and non-text responses are refused.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use contactscout_shared::{DenyList, PipelineConfig, Result, ScoutError, host_matches};

use crate::guard::is_ssrf_target;
use crate::session::{BrowserSession, SearchHit, SessionProvider};
use crate::text::{collapse_whitespace, visible_text};

/// Maximum redirects followed per navigation.
const MAX_REDIRECTS: usize = 5;

/// Default maximum response size (5 MB).
pub const MAX_BODY_BYTES: u64 = 5 * 1024 * 1024;

/// Content types treated as text documents.
const TEXT_CONTENT_TYPES: &[&str] = &["text/html", "text/plain", "application/xhtml+xml"];

/// Settings shared by every session a provider opens.
#[derive(Debug, Clone)]
pub struct HttpSessionSettings {
    /// Search endpoint with a `{query}` placeholder.
    pub search_url: String,
    pub user_agent: String,
    pub max_page_chars: usize,
    pub request_timeout: Duration,
    /// Bodies larger than this are refused, whether or not they are sized.
    pub max_body_bytes: u64,
    /// Redirects into these domains are not followed.
    pub deny_list: DenyList,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    pub allow_localhost: bool,
}

impl HttpSessionSettings {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            search_url: config.search_url.clone(),
            user_agent: config.user_agent.clone(),
            max_page_chars: config.max_page_chars,
            request_timeout: config.page_timeout.max(config.search_timeout),
            max_body_bytes: MAX_BODY_BYTES,
            deny_list: config.deny_list.clone(),
            allow_localhost: false,
        }
    }
}

/// Opens [`HttpSession`]s for the pool.
pub struct HttpSessionProvider {
    settings: Arc<HttpSessionSettings>,
}

impl HttpSessionProvider {
    pub fn new(settings: HttpSessionSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl SessionProvider for HttpSessionProvider {
    fn open(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(HttpSession::new(self.settings.clone())?))
    }
}

/// The page most recently navigated to.
struct LoadedPage {
    url: Url,
    html: String,
}

/// A browsing session over plain HTTP.
pub struct HttpSession {
    settings: Arc<HttpSessionSettings>,
    client: Client,
    page: Option<LoadedPage>,
    history: Vec<Url>,
}

impl HttpSession {
    pub fn new(settings: Arc<HttpSessionSettings>) -> Result<Self> {
        let client = build_client(&settings)?;
        Ok(Self {
            settings,
            client,
            page: None,
            history: Vec::new(),
        })
    }

    /// URLs loaded since the last reset.
    pub fn history(&self) -> &[Url] {
        &self.history
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.page.as_ref().map(|p| &p.url)
    }

    /// GET a text document, enforcing status, size, and content-type rules.
    async fn load(&mut self, url: &Url) -> Result<String> {
        let mut response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                ScoutError::FetchTimeout {
                    url: url.to_string(),
                    waited_ms: self.settings.request_timeout.as_millis() as u64,
                }
            } else {
                ScoutError::fetch(url.as_str(), e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::fetch(url.as_str(), format!("HTTP {status}")));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or("").to_ascii_lowercase();
            if !TEXT_CONTENT_TYPES.iter().any(|t| content_type.starts_with(t)) {
                return Err(ScoutError::fetch(
                    url.as_str(),
                    format!("non-text content type {content_type:?}"),
                ));
            }
        }

        let limit = self.settings.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(ScoutError::fetch(url.as_str(), "response too large"));
        }

        // Unsized (chunked or close-delimited) bodies are capped while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ScoutError::fetch(url.as_str(), format!("body read failed: {e}")))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(ScoutError::fetch(url.as_str(), "response too large"));
            }
            body.extend_from_slice(&chunk);
        }

        self.history.push(url.clone());
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&mut self, query: &str) -> Result<Vec<SearchHit>> {
        let target = render_search_url(&self.settings.search_url, query)?;
        let html = self.load(&target).await.map_err(|e| match e {
            ScoutError::FetchError { message, .. } => {
                ScoutError::Network(format!("search request failed: {message}"))
            }
            other => other,
        })?;

        let hits = parse_search_results(&html, &target);
        debug!(hits = hits.len(), "search page parsed");
        self.page = Some(LoadedPage { url: target, html });
        Ok(hits)
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        if !self.settings.allow_localhost && is_ssrf_target(url) {
            return Err(ScoutError::fetch(url.as_str(), "SSRF protection: blocked"));
        }
        let html = self.load(url).await?;
        self.page = Some(LoadedPage {
            url: url.clone(),
            html,
        });
        Ok(())
    }

    async fn extract_text(&mut self) -> Result<String> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| ScoutError::fetch("about:blank", "no page loaded"))?;
        Ok(visible_text(&page.html, self.settings.max_page_chars))
    }

    async fn reset(&mut self) -> Result<()> {
        // A fresh client drops the cookie jar and any pooled connections.
        self.client = build_client(&self.settings)?;
        self.page = None;
        self.history.clear();
        Ok(())
    }
}

fn build_client(settings: &HttpSessionSettings) -> Result<Client> {
    let allow_localhost = settings.allow_localhost;
    let deny_list = settings.deny_list.clone();
    let redirect = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_localhost && is_ssrf_target(attempt.url()) {
            attempt.stop()
        } else if deny_list.is_denied(attempt.url()) {
            let host = attempt.url().host_str().unwrap_or("").to_string();
            attempt.error(format!("redirect to denied host {host}"))
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .cookie_store(true)
        .redirect(redirect)
        .timeout(settings.request_timeout)
        .build()
        .map_err(|e| ScoutError::Network(format!("failed to build HTTP client: {e}")))
}

/// Substitute the URL-encoded query into the search endpoint template.
pub fn render_search_url(template: &str, query: &str) -> Result<Url> {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    let raw = template.replace("{query}", &encoded);
    Url::parse(&raw).map_err(|e| ScoutError::config(format!("invalid search URL {raw:?}: {e}")))
}

/// Parse organic result links from a search results page.
///
/// A result link is an anchor with the `result__a` class or one wrapping an
/// `<h3>` title. Redirect wrappers (`?uddg=`, `/url?q=`) are unwrapped, and
/// links back to the search engine itself are dropped.
pub fn parse_search_results(html: &str, page_url: &Url) -> Vec<SearchHit> {
    static ANCHOR_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
    static H3_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("h3").expect("valid selector"));

    let doc = Html::parse_document(html);
    let engine_host = page_url.host_str().unwrap_or("");
    let mut seen = HashSet::new();
    let mut hits = Vec::new();

    for anchor in doc.select(&ANCHOR_SEL) {
        let is_result = anchor.value().classes().any(|c| c == "result__a")
            || anchor.select(&H3_SEL).next().is_some();
        if !is_result {
            continue;
        }

        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve_result_href(href, page_url) else {
            continue;
        };

        let host = url.host_str().unwrap_or("");
        if host_matches(host, engine_host) || host_matches(engine_host, host) {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }

        let title = match anchor.select(&H3_SEL).next() {
            Some(h3) => collapse_whitespace(&h3.text().collect::<String>()),
            None => collapse_whitespace(&anchor.text().collect::<String>()),
        };
        hits.push(SearchHit { url, title });
    }

    hits
}

/// Resolve a result href to the destination URL.
fn resolve_result_href(href: &str, page_url: &Url) -> Option<Url> {
    let joined = page_url.join(href).ok()?;

    let wrapped = joined
        .query_pairs()
        .find(|(k, _)| k == "uddg" || (joined.path() == "/url" && (k == "q" || k == "url")))
        .map(|(_, v)| v.into_owned());

    let mut url = match wrapped {
        Some(target) => Url::parse(&target).ok()?,
        None => joined,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
