//! discoscrape: discovery scraper for manga and novel listing sites. Fetches volatile
//! listing pages, extracts candidates through fallback strategy chains, and normalizes
//! them into stable trending, popular, latest and ranking buckets.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod document;
pub mod extract;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use discovery::{
    CacheError, CacheStore, Discovery, DiscoveryOptions, FileCache, MemoryCache, RetryPolicy,
    RunState,
};
pub use document::RawDocument;
pub use model::{Bucket, Candidate, DiscoveryPayload, Record, SeriesDetail};
pub use normalize::Normalizer;
pub use scraper::{
    adapter_for, resolve_site, DiscoveryError, FetchError, FetchOptions, Fetcher, ParseError,
    PoliteClient, PoliteClientBuilder, ProxyRelay, Site, SiteAdapter,
};
