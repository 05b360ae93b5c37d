use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::catalog::CatalogItem;

/// Version used when an entry title carries no recognisable version token
pub const UNKNOWN_VERSION: &str = "unknown";

/// Total request timeout for one feed retrieval
const REQUEST_TIMEOUT_SECS: u64 = 15;

const CONNECT_TIMEOUT_SECS: u64 = 10;

const MAX_REDIRECTS: usize = 5;

/// Some release sites refuse requests from library user agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+\.\d+\.\d+(?:\.\d+)?").expect("version pattern is valid")
});

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),
    #[error("feed parsing error: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
    #[error("feed has no entries")]
    NoEntries,
    #[error("pre-release entry skipped: {0}")]
    PreRelease(String),
}

/// One entry as delivered by the feed, in provider order
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

/// The newest entry of a feed together with its extracted version
#[derive(Debug, Clone, PartialEq)]
pub struct LatestRelease {
    pub title: String,
    pub link: String,
    pub version: String,
}

/// Parse a raw RSS/Atom/JSON feed document into its entries.
pub fn parse_entries(raw: &[u8]) -> Result<Vec<FeedEntry>, FetchError> {
    let feed = feed_rs::parser::parse(raw)?;
    let entries = feed
        .entries
        .into_iter()
        .map(|entry| FeedEntry {
            title: entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            published: entry.published.or(entry.updated),
        })
        .collect();
    Ok(entries)
}

/// Pull the first `a.b.c[.d]` token out of a title, or `"unknown"`.
pub fn extract_version(title: &str) -> String {
    VERSION_RE
        .find(title)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

pub fn is_pre_release(title: &str) -> bool {
    title.to_lowercase().contains("beta")
}

/// Reduce a feed to its newest entry. Entries are taken in provider order,
/// never re-sorted.
pub fn latest_release(entries: Vec<FeedEntry>) -> Result<LatestRelease, FetchError> {
    let entry = entries.into_iter().next().ok_or(FetchError::NoEntries)?;
    debug!(title = %entry.title, published = ?entry.published, "Latest feed entry");
    if is_pre_release(&entry.title) {
        return Err(FetchError::PreRelease(entry.title));
    }
    Ok(LatestRelease {
        version: extract_version(&entry.title),
        title: entry.title,
        link: entry.link,
    })
}

/// Source of release information for catalog items
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self, item: &CatalogItem) -> Result<LatestRelease, FetchError>;
}

/// Fetches feeds over HTTP with bounded timeouts
pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedFetcher {
    async fn fetch_latest(&self, item: &CatalogItem) -> Result<LatestRelease, FetchError> {
        debug!(item = %item.name, url = %item.feed_url, "Fetching feed");

        let response = self.client.get(&item.feed_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        latest_release(parse_entries(&bytes)?)
    }
}
