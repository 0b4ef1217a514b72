//! Discovery runs: fetch every page task of a site, extract and normalize each bucket,
//! merge, and hand the payload to the cache.
//!
//! Fetch and parse failures stop at the page boundary: they are logged and the page
//! contributes nothing. A run fails only when every bucket comes back empty.

mod cache;

pub use cache::{load_payload, store_payload, CacheError, CacheStore, FileCache, MemoryCache};

use crate::document::RawDocument;
use crate::extract::run_chain;
use crate::merge::{merge, merge_all, reconcile};
use crate::model::{Bucket, ChapterLink, DiscoveryPayload, Record, SeriesDetail};
use crate::normalize::Normalizer;
use crate::scraper::{
    BucketRule, DiscoveryError, FetchError, FetchOptions, Fetcher, PageTask, ParseError,
    ProxyRelay, SiteAdapter,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default number of attempts per route (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 4] = [1, 2, 4, 8];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];
const DEFAULT_BUCKET_CAP: usize = 60;
const DEFAULT_MAX_PAGES: u32 = 3;

/// Progress callback: task name, pages done, pages expected.
pub type Progress<'a> = &'a dyn Fn(&str, u32, u32);

/// Lifecycle of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running {
        current_task: String,
        completed: u32,
        total: u32,
    },
    Completed,
    Failed {
        reason: String,
    },
}

/// Retries for one route. Only network errors, 429 and 5xx are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Vec<Duration>,
    rate_limit_backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COUNT, DEFAULT_BACKOFF_SECS.to_vec())
    }
}

impl RetryPolicy {
    /// `backoff_secs` are the delays before each retry; when shorter than
    /// `attempts - 1` the last value is reused, and when empty 1, 2, 4, ... is used.
    pub fn new(attempts: u32, backoff_secs: Vec<u64>) -> Self {
        let attempts = attempts.max(1);
        let backoff_secs = if backoff_secs.is_empty() {
            (0..attempts.saturating_sub(1)).map(|i| 1u64 << i.min(6)).collect()
        } else {
            backoff_secs
        };
        Self {
            attempts,
            backoff: backoff_secs.into_iter().map(Duration::from_secs).collect(),
            rate_limit_backoff: BACKOFF_429_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }

    /// Retry without waiting. Used by tests and by callers that pace requests themselves.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: vec![Duration::ZERO],
            rate_limit_backoff: vec![Duration::ZERO],
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay_for(&self, error: &FetchError, retry: usize) -> Duration {
        let schedule = if error.is_rate_limited() {
            &self.rate_limit_backoff
        } else {
            &self.backoff
        };
        schedule
            .get(retry)
            .or_else(|| schedule.last())
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Knobs of a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Maximum records kept per bucket.
    pub bucket_cap: usize,
    /// Upper bound on pages requested by a paginated task or `search_all`.
    pub max_pages: u32,
    pub retry: RetryPolicy,
    /// Relays tried in order after the direct route fails.
    pub relays: Vec<ProxyRelay>,
    /// Identity sent with every request.
    pub fetch: FetchOptions,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            bucket_cap: DEFAULT_BUCKET_CAP,
            max_pages: DEFAULT_MAX_PAGES,
            retry: RetryPolicy::default(),
            relays: Vec::new(),
            fetch: FetchOptions::default(),
        }
    }
}

/// Aggregator for one site. Holds the injected fetcher, adapter and cache.
pub struct Discovery<'a> {
    fetcher: &'a dyn Fetcher,
    adapter: &'a dyn SiteAdapter,
    cache: &'a dyn CacheStore,
    normalizer: Normalizer,
    options: DiscoveryOptions,
    state: RunState,
    cancel: Arc<AtomicBool>,
}

impl<'a> Discovery<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        adapter: &'a dyn SiteAdapter,
        cache: &'a dyn CacheStore,
    ) -> Self {
        Self {
            fetcher,
            adapter,
            cache,
            normalizer: Normalizer::default().with_reserved(adapter.reserved_fragments()),
            options: DiscoveryOptions::default(),
            state: RunState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: DiscoveryOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the normalizer; the site's reserved fragments are added to it.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer.with_reserved(self.adapter.reserved_fragments());
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Flag checked between pages; setting it ends the run with [DiscoveryError::Cancelled].
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Fetch `url`, direct first and then through each relay, retrying transient
    /// failures on every route.
    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let routes = std::iter::once(None).chain(self.options.relays.iter().map(Some));
        let mut last_error = None;
        for relay in routes {
            let options = FetchOptions {
                proxy: relay.cloned(),
                ..self.options.fetch.clone()
            };
            let route = relay.map(|r| r.label()).unwrap_or_else(|| "direct".to_string());
            match self.fetch_with_retry(url, &options).await {
                Ok(body) => return Ok(body),
                Err(e @ FetchError::InvalidUrl { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(url, route = %route, error = %e, "route failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| FetchError::Network {
            url: url.to_string(),
            reason: "no route available".to_string(),
        }))
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, FetchError> {
        let attempts = self.options.retry.attempts();
        let mut attempt = 0;
        loop {
            match self.fetcher.fetch(url, options).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.options.retry.delay_for(&e, attempt as usize);
                    tracing::debug!(url, attempt = attempt + 1, ?delay, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse one page and run every bucket rule against it. The document never
    /// outlives this call. Records of each bucket are deduplicated within the page, so
    /// their count and positions are per series rather than per anchor.
    fn extract_page(
        &self,
        body: &str,
        url: &str,
        rules: &[BucketRule],
    ) -> Result<Vec<Vec<Record>>, ParseError> {
        let doc = RawDocument::parse(body, url)?;
        let origin = doc.origin();
        Ok(rules
            .iter()
            .map(|rule| {
                let candidates = run_chain(&rule.chain, &doc);
                let mut records = Vec::new();
                merge_all(&mut records, self.normalizer.normalize_all(&candidates, &origin));
                tracing::debug!(
                    bucket = %rule.bucket,
                    candidates = candidates.len(),
                    records = records.len(),
                    "page extracted"
                );
                records
            })
            .collect())
    }

    /// Fetch and extract one page; any failure reads as an empty page.
    async fn page_records(&self, url: &str, rules: &[BucketRule]) -> Vec<Vec<Record>> {
        let empty = || rules.iter().map(|_| Vec::new()).collect();
        let body = match self.fetch_page(url).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url, error = %e, "fetch failed; page treated as empty");
                return empty();
            }
        };
        match self.extract_page(&body, url, rules) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(url, error = %e, "parse failed; page treated as empty");
                empty()
            }
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.state = RunState::Failed {
            reason: reason.into(),
        };
    }

    /// Run every page task of the site in order and replace the site's cache entry with
    /// the result. Progress is reported after each page.
    pub async fn run(
        &mut self,
        progress: Option<Progress<'_>>,
    ) -> Result<DiscoveryPayload, DiscoveryError> {
        let tasks = match self.adapter.discovery_tasks(self.options.max_pages) {
            Ok(tasks) => tasks,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e.into());
            }
        };
        let pages_of = |task: &PageTask| {
            task.pagination
                .map(|p| p.max_pages.max(1))
                .unwrap_or(1)
        };
        let mut total: u32 = tasks.iter().map(pages_of).sum();
        let mut completed = 0;
        let mut buckets: Vec<Bucket> = Vec::new();
        for rule in tasks.iter().flat_map(|t| t.buckets.iter()) {
            if !buckets.iter().any(|b| b.name == rule.bucket) {
                buckets.push(Bucket::new(rule.bucket.clone()));
            }
        }

        for task in &tasks {
            let pages = pages_of(task);
            for page in 1..=pages {
                if self.cancelled() {
                    self.fail("cancelled");
                    return Err(DiscoveryError::Cancelled {
                        task: task.name.clone(),
                    });
                }
                self.state = RunState::Running {
                    current_task: task.name.clone(),
                    completed,
                    total,
                };
                let url = task.page_url(page);
                let found = self.page_records(&url, &task.buckets).await;
                let page_count: usize = found.iter().map(Vec::len).sum();

                let mut capped = true;
                for (rule, records) in task.buckets.iter().zip(found) {
                    let Some(bucket) = buckets.iter_mut().find(|b| b.name == rule.bucket) else {
                        continue;
                    };
                    for (index, mut record) in records.into_iter().enumerate() {
                        if bucket.len() >= self.options.bucket_cap {
                            break;
                        }
                        if let Some(p) = task.pagination.filter(|p| p.ranked) {
                            record.rank = Some((page as usize - 1) * p.page_size + index);
                        }
                        merge(&mut bucket.records, record);
                    }
                    capped &= bucket.len() >= self.options.bucket_cap;
                }

                completed += 1;
                let more = match task.pagination {
                    Some(p) => page < pages && page_count >= p.page_size && !capped,
                    None => false,
                };
                if !more {
                    total -= pages - page;
                }
                tracing::info!(task = %task.name, page, records = page_count, "page done");
                if let Some(report) = progress {
                    report(&task.name, completed, total);
                }
                if !more {
                    break;
                }
            }
        }

        reconcile(&mut buckets);
        let mut payload = DiscoveryPayload::new(Utc::now());
        for bucket in buckets {
            payload.insert(bucket);
        }
        if payload.is_empty() {
            self.fail("every bucket came back empty");
            return Err(DiscoveryError::NoResults);
        }
        if let Err(e) = store_payload(self.cache, self.adapter.cache_key(), &payload) {
            self.fail(e.to_string());
            return Err(e.into());
        }
        tracing::info!(
            key = self.adapter.cache_key(),
            records = payload.total_records(),
            "discovery payload cached"
        );
        self.state = RunState::Completed;
        Ok(payload)
    }

    fn listing_records(&self, body: &str, url: &str) -> Result<Vec<Record>, ParseError> {
        let rule = BucketRule::new("search", self.adapter.listing_chain()?);
        let mut found = self.extract_page(body, url, std::slice::from_ref(&rule))?;
        Ok(found.pop().unwrap_or_default())
    }

    /// One page of search results, ranked by position.
    pub async fn search(&self, query: &str, page: u32) -> Result<Vec<Record>, DiscoveryError> {
        let page = page.max(1);
        let url = self.adapter.search_url(query, page)?;
        let body = self.fetch_page(&url).await?;
        let mut records = self.listing_records(&body, &url)?;
        let size = self.adapter.search_page_size();
        for (index, record) in records.iter_mut().enumerate() {
            record.rank = Some((page as usize - 1) * size + index);
        }
        Ok(records)
    }

    /// Follow search pages while each one is full, up to `max_pages`. A failure after the
    /// first page ends the listing with what was collected.
    pub async fn search_all(
        &self,
        query: &str,
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<Record>, DiscoveryError> {
        let size = self.adapter.search_page_size();
        let max_pages = self.options.max_pages.max(1);
        let mut all = Vec::new();
        for page in 1..=max_pages {
            if self.cancelled() {
                return Err(DiscoveryError::Cancelled {
                    task: format!("search page {}", page),
                });
            }
            let found = match self.search(query, page).await {
                Ok(found) => found,
                Err(e) if page > 1 => {
                    tracing::warn!(page, error = %e, "search page failed; stopping");
                    break;
                }
                Err(e) => return Err(e),
            };
            let count = found.len();
            merge_all(&mut all, found);
            if let Some(report) = progress {
                report("search", page, max_pages);
            }
            if count < size {
                break;
            }
        }
        Ok(all)
    }

    /// Metadata and chapter list of one series. When the site lists chapters in a
    /// separate feed, a failed feed leaves the chapter list empty.
    pub async fn series(&self, url: &str) -> Result<SeriesDetail, DiscoveryError> {
        let detail_url = self.adapter.detail_url(url)?;
        let body = self.fetch_page(&detail_url).await?;
        let mut detail = {
            let doc = RawDocument::parse(&body, &detail_url)?;
            self.adapter.series_detail(&doc)?
        };
        if let Some(feed_url) = self.adapter.chapter_feed_url(&detail) {
            match self.chapter_feed(&feed_url).await {
                Ok(chapters) => detail.chapters = chapters,
                Err(e) => {
                    tracing::warn!(url = %feed_url, error = %e, "chapter feed failed");
                }
            }
        }
        Ok(detail)
    }

    async fn chapter_feed(&self, url: &str) -> Result<Vec<ChapterLink>, DiscoveryError> {
        let body = self.fetch_page(url).await?;
        let doc = RawDocument::parse(&body, url)?;
        Ok(self.adapter.chapter_feed(&doc)?)
    }

    /// Page images of one chapter, in reading order.
    pub async fn chapter_images(&self, url: &str) -> Result<Vec<String>, DiscoveryError> {
        let images_url = self.adapter.chapter_images_url(url)?;
        let body = self.fetch_page(&images_url).await?;
        let images = {
            let doc = RawDocument::parse(&body, &images_url)?;
            self.adapter.chapter_images(&doc)?
        };
        if images.is_empty() {
            return Err(DiscoveryError::Empty {
                what: "chapter images",
                url: url.to_string(),
            });
        }
        Ok(images)
    }
}
