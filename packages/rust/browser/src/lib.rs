//! Pooled browsing sessions, search, and page retrieval.
//!
//! This crate provides:
//! - [`session`]: the session contract every browse provider implements
//! - [`http`]: an HTTP-backed session (`reqwest` + `scraper`)
//! - [`pool`]: the bounded [`BrowserSessionPool`] all network I/O goes through
//! - [`search`] / [`fetch`]: the [`SearchExecutor`] and [`PageFetcher`] contracts
//!   and their pool-backed implementations

pub mod fetch;
pub mod guard;
pub mod http;
pub mod pool;
pub mod search;
pub mod session;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

pub use fetch::{PageFetcher, PooledPageFetcher};
pub use http::{HttpSession, HttpSessionProvider, HttpSessionSettings, MAX_BODY_BYTES};
pub use pool::{BrowserSessionPool, SessionLease};
pub use search::{PooledSearchExecutor, SearchExecutor, rank_candidates};
pub use session::{BrowserSession, SearchHit, SessionProvider};
