//! Fetching and site adapters. Site detection, fetcher trait, shared client, and adapters.

mod client;
mod error;

pub mod asura;
pub mod madara;
pub mod mangadex;

pub use client::{
    is_challenge_page, relay_headers, PoliteClient, PoliteClientBuilder, ProxyRelay,
    DEFAULT_USER_AGENT,
};
pub use error::{DiscoveryError, FetchError, ParseError};

use crate::document::RawDocument;
use crate::extract::Strategy;
use crate::model::{ChapterLink, SeriesDetail};
use async_trait::async_trait;
use reqwest::Url;

/// Strip a known site suffix from the end of a page title (e.g. " - Asura Scans") so that
/// titles containing " - " or " | " themselves are preserved.
pub fn strip_title_site_suffix(s: &str, suffixes: &[&str]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        if let Some(stripped) = t.strip_suffix(suffix) {
            t = stripped.trim();
            break;
        }
    }
    t.to_string()
}

/// Build `base` + `path` with form-encoded query pairs.
pub fn url_with_query(
    base: &str,
    path: &str,
    pairs: &[(&str, &str)],
) -> Result<String, FetchError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse_with_params(&joined, pairs)
        .map(String::from)
        .map_err(|e| FetchError::InvalidUrl {
            input: joined,
            reason: e.to_string(),
        })
}

/// Per-request identity and routing.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Overrides the client's User-Agent for this request.
    pub user_agent: Option<String>,
    /// Overrides the default referer (`<target origin>/`).
    pub referer: Option<String>,
    pub proxy: Option<ProxyRelay>,
}

/// Issues one GET and returns the body text. Implementations do not retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError>;
}

/// Supported source site family. Used for dispatch and for --site override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// Asura Scans style Next.js site.
    Asura,
    /// WordPress sites running the Madara manga theme.
    Madara,
    /// The MangaDex JSON API.
    MangaDex,
}

impl Site {
    pub fn as_str(self) -> &'static str {
        match self {
            Site::Asura => "asura",
            Site::Madara => "madara",
            Site::MangaDex => "mangadex",
        }
    }
}

impl std::str::FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asura" | "asurascans" | "asuracomic" => Ok(Site::Asura),
            "madara" | "wordpress" | "wp-manga" => Ok(Site::Madara),
            "mangadex" | "md" => Ok(Site::MangaDex),
            other => Err(format!(
                "unknown site {:?}; expected \"asura\", \"madara\" or \"mangadex\"",
                other
            )),
        }
    }
}

/// Resolve which site family to use from URL and optional override.
///
/// Hosts that are neither Asura nor MangaDex fall back to Madara, the most common
/// WordPress manga theme.
pub fn resolve_site(url_input: &str, override_site: Option<Site>) -> Result<Site, FetchError> {
    if let Some(site) = override_site {
        return Ok(site);
    }
    let url = Url::parse(url_input).map_err(|e| FetchError::InvalidUrl {
        input: url_input.to_string(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| FetchError::InvalidUrl {
        input: url_input.to_string(),
        reason: "URL has no host".to_string(),
    })?;
    if host.contains("asuracomic") || host.contains("asurascans") {
        Ok(Site::Asura)
    } else if host.contains("mangadex") {
        Ok(Site::MangaDex)
    } else {
        Ok(Site::Madara)
    }
}

/// Pagination of a listing task: keep requesting while a page fills at least `page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page_size: usize,
    pub max_pages: u32,
    /// Records get rank = (page - 1) * page_size + index.
    pub ranked: bool,
}

/// A bucket filled from one page by a fallback chain of strategies.
pub struct BucketRule {
    pub bucket: String,
    pub chain: Vec<Box<dyn Strategy>>,
}

impl BucketRule {
    pub fn new(bucket: impl Into<String>, chain: Vec<Box<dyn Strategy>>) -> Self {
        Self {
            bucket: bucket.into(),
            chain,
        }
    }
}

/// One page category of a discovery run. `url` may contain `{page}` or, for APIs that
/// page by item count, `{offset}`.
pub struct PageTask {
    pub name: String,
    pub url: String,
    pub buckets: Vec<BucketRule>,
    pub pagination: Option<Pagination>,
}

impl PageTask {
    pub fn page_url(&self, page: u32) -> String {
        let offset = self
            .pagination
            .map(|p| (page.max(1) as usize - 1) * p.page_size)
            .unwrap_or(0);
        self.url
            .replace("{page}", &page.to_string())
            .replace("{offset}", &offset.to_string())
    }
}

/// Site adapter: where to fetch and which strategies read each page archetype.
///
/// Adapters are pure descriptions plus synchronous extraction; all fetching is done by
/// [Discovery](crate::discovery::Discovery).
pub trait SiteAdapter: Send + Sync {
    fn site(&self) -> Site;

    fn base_url(&self) -> &str;

    /// Fixed key the discovery payload is cached under.
    fn cache_key(&self) -> &str;

    /// Lowercase site-name fragments that mark navigation text rather than titles.
    fn reserved_fragments(&self) -> Vec<String>;

    /// Page tasks of a discovery run, in the order they are fetched and merged.
    fn discovery_tasks(&self, max_pages: u32) -> Result<Vec<PageTask>, ParseError>;

    /// Search results URL for a 1-indexed page.
    fn search_url(&self, query: &str, page: u32) -> Result<String, FetchError>;

    /// Fallback chain for search-result and listing grids.
    fn listing_chain(&self) -> Result<Vec<Box<dyn Strategy>>, ParseError>;

    /// Nominal number of results on a full search page.
    fn search_page_size(&self) -> usize;

    /// URL whose body [series_detail](SiteAdapter::series_detail) reads. HTML sites
    /// fetch the series page itself.
    fn detail_url(&self, url: &str) -> Result<String, FetchError> {
        Ok(url.to_string())
    }

    fn series_detail(&self, doc: &RawDocument) -> Result<SeriesDetail, ParseError>;

    /// Separate chapter listing for sites whose detail page does not carry one.
    fn chapter_feed_url(&self, _detail: &SeriesDetail) -> Option<String> {
        None
    }

    fn chapter_feed(&self, _doc: &RawDocument) -> Result<Vec<ChapterLink>, ParseError> {
        Ok(Vec::new())
    }

    /// URL whose body [chapter_images](SiteAdapter::chapter_images) reads.
    fn chapter_images_url(&self, url: &str) -> Result<String, FetchError> {
        Ok(url.to_string())
    }

    fn chapter_images(&self, doc: &RawDocument) -> Result<Vec<String>, ParseError>;
}

/// Build the adapter for a site, rooted at `base_url` when given.
pub fn adapter_for(site: Site, base_url: Option<&str>) -> Box<dyn SiteAdapter> {
    match site {
        Site::Asura => Box::new(asura::AsuraAdapter::new(
            base_url.unwrap_or(asura::ASURA_BASE),
        )),
        Site::Madara => Box::new(madara::MadaraAdapter::new(
            base_url.unwrap_or(madara::MADARA_DEFAULT_BASE),
        )),
        Site::MangaDex => Box::new(mangadex::MangaDexAdapter::new(
            base_url.unwrap_or(mangadex::MANGADEX_API),
        )),
    }
}
