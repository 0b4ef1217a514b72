//! CLI parsing and orchestration. Resolves settings from flags and config, runs a discovery
//! sync, search, or detail request, and prints JSON to stdout. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::discovery::{
    load_payload, CacheError, Discovery, DiscoveryOptions, FileCache, RetryPolicy,
};
use crate::normalize::{Normalizer, DEFAULT_NOISE_TOKENS, DEFAULT_RESERVED_WORDS};
use crate::scraper::{
    adapter_for, resolve_site, DiscoveryError, FetchError, FetchOptions, PoliteClient, ProxyRelay,
    Site,
};
use clap::{Parser, Subcommand};
use reqwest::Url;
use serde::Serialize;
use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DELAY_MS: u64 = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("Failed to write JSON: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Discovery(DiscoveryError::Cache(_)) => 3,
            CliRunError::Discovery(_) => 2,
            CliRunError::Cache(_) | CliRunError::Output(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "discoscrape")]
#[command(about = "Discover trending, popular and latest series on manga and novel sites")]
#[command(
    after_help = concat!(
        "Config file keys (site, base_url, user_agent, referer, timeout_secs, ",
        "request_delay_ms, retry_count, retry_backoff_secs, relays, noise_tokens, ",
        "reserved_words, bucket_cap, max_pages, cache_dir) are read from ./discoscrape.toml ",
        "or the user config dir. CLI flags override config."
    )
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Site profile: asura, madara or mangadex. Default: detected from the URL or base URL.
    #[arg(long, global = true, value_parser = parse_site)]
    pub site: Option<Site>,

    /// Root URL of the site (e.g. a Madara mirror).
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// HTTP User-Agent (overrides config).
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Delay between requests in milliseconds (overrides config; default 500).
    #[arg(long, global = true)]
    pub delay: Option<u64>,

    /// Relay URL tried after the direct route fails. Repeatable; replaces configured relays.
    #[arg(long = "proxy", global = true)]
    pub proxies: Vec<String>,

    /// Directory of cached discovery payloads (overrides config).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Suppress progress output (errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print verbose error chain and debug logs.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a full discovery pass and replace the cached payload.
    Sync,
    /// Search the site's listing.
    Search {
        query: String,
        /// 1-indexed results page.
        #[arg(long, value_parser = parse_page, conflicts_with = "all")]
        page: Option<u32>,
        /// Follow result pages while they are full, up to max_pages.
        #[arg(long)]
        all: bool,
    },
    /// Print metadata and chapter list of a series page.
    Series { url: String },
    /// Print page image URLs of a chapter.
    Chapter { url: String },
    /// Print the cached discovery payload without fetching.
    Show {
        /// Print only this bucket (e.g. trending, latest).
        #[arg(long)]
        bucket: Option<String>,
    },
}

impl Command {
    /// URL the command targets, when it names one.
    fn target_url(&self) -> Option<&str> {
        match self {
            Command::Series { url } | Command::Chapter { url } => Some(url),
            _ => None,
        }
    }
}

fn parse_site(s: &str) -> Result<Site, String> {
    s.parse::<Site>()
        .map_err(|e| format!("Invalid --site value: {}", e))
}

fn parse_page(s: &str) -> Result<u32, String> {
    match s.trim().parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!(
            "Invalid --page value: '{}'. Pages start at 1.",
            s
        )),
    }
}

/// Flags merged over config over defaults.
#[derive(Debug)]
struct Settings {
    site: Option<Site>,
    base_url: Option<String>,
    user_agent: Option<String>,
    timeout_secs: u64,
    delay_ms: u64,
    normalizer: Normalizer,
    discovery: DiscoveryOptions,
    cache_dir: PathBuf,
}

fn invalid_url(what: &str, url: &str, e: impl std::fmt::Display) -> CliRunError {
    CliRunError::InvalidInput(format!("Invalid {} '{}': {}", what, url, e))
}

fn resolve_settings(args: &Args, config: Config) -> Result<Settings, CliRunError> {
    let site = match (args.site, config.site.as_deref()) {
        (Some(site), _) => Some(site),
        (None, Some(s)) => Some(s.parse::<Site>().map_err(|e| {
            CliRunError::InvalidInput(format!("Invalid site in config: {}", e))
        })?),
        (None, None) => None,
    };
    let base_url = args.base_url.clone().or(config.base_url);
    if let Some(base) = &base_url {
        Url::parse(base).map_err(|e| invalid_url("base URL", base, e))?;
    }

    let relays = if args.proxies.is_empty() {
        config.relays.unwrap_or_default()
    } else {
        args.proxies.iter().map(ProxyRelay::new).collect()
    };
    for relay in &relays {
        Url::parse(&relay.url).map_err(|e| invalid_url("relay URL", &relay.url, e))?;
    }

    let normalizer = Normalizer::new(
        config.noise_tokens.unwrap_or_else(|| {
            DEFAULT_NOISE_TOKENS.iter().map(|s| s.to_string()).collect()
        }),
        config.reserved_words.unwrap_or_else(|| {
            DEFAULT_RESERVED_WORDS.iter().map(|s| s.to_string()).collect()
        }),
    );

    let defaults = DiscoveryOptions::default();
    let discovery = DiscoveryOptions {
        bucket_cap: config.bucket_cap.unwrap_or(defaults.bucket_cap).max(1),
        max_pages: config.max_pages.unwrap_or(defaults.max_pages).max(1),
        retry: RetryPolicy::new(
            config.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            config.retry_backoff_secs.unwrap_or_default(),
        ),
        relays,
        fetch: FetchOptions {
            user_agent: None,
            referer: config.referer,
            proxy: None,
        },
    };

    let cache_dir = args
        .cache_dir
        .clone()
        .or(config.cache_dir)
        .or_else(FileCache::default_dir)
        .ok_or_else(|| {
            CliRunError::InvalidInput(
                "No cache directory available on this platform; pass --cache-dir.".to_string(),
            )
        })?;

    Ok(Settings {
        site,
        base_url,
        user_agent: args.user_agent.clone().or(config.user_agent),
        timeout_secs: args
            .timeout
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        delay_ms: args
            .delay
            .or(config.request_delay_ms)
            .unwrap_or(DEFAULT_DELAY_MS),
        normalizer,
        discovery,
        cache_dir,
    })
}

/// Pick the site and base URL for a command: explicit site, else the target URL's host,
/// else the base URL's host, else Asura.
///
/// HTML sites are rooted at the target's origin. MangaDex pages live on a different host
/// than its API, so a target there keeps the configured API base or the default one.
fn site_and_base(
    settings: &Settings,
    target: Option<&str>,
) -> Result<(Site, Option<String>), CliRunError> {
    let to_input =
        |e: FetchError| CliRunError::InvalidInput(format!("Expected a site URL. {}", e));
    match target {
        Some(url) => {
            let site = resolve_site(url, settings.site).map_err(to_input)?;
            if site == Site::MangaDex {
                let api = settings
                    .base_url
                    .clone()
                    .filter(|b| matches!(resolve_site(b, None), Ok(Site::MangaDex)));
                return Ok((site, api));
            }
            let base = match &settings.base_url {
                Some(base) => base.clone(),
                None => Url::parse(url)
                    .map_err(|e| invalid_url("URL", url, e))?
                    .origin()
                    .ascii_serialization(),
            };
            Ok((site, Some(base)))
        }
        None => {
            let site = match (settings.site, &settings.base_url) {
                (Some(site), _) => site,
                (None, Some(base)) => resolve_site(base, None).map_err(to_input)?,
                (None, None) => Site::Asura,
            };
            Ok((site, settings.base_url.clone()))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliRunError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out).map_err(|e| CliRunError::Output(serde_json::Error::io(e)))?;
    Ok(())
}

fn progress_bar(total: u32) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total as u64);
    let style = indicatif::ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .progress_chars("█▉▊▋▌▍▎▏ ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub async fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let settings = resolve_settings(args, config.unwrap_or_default())?;
    let (site, base_url) = site_and_base(&settings, args.command.target_url())?;
    let adapter = adapter_for(site, base_url.as_deref());
    let cache = FileCache::new(&settings.cache_dir);
    tracing::debug!(
        site = site.as_str(),
        base = adapter.base_url(),
        cache = %cache.dir().display(),
        "settings resolved"
    );

    if let Command::Show { bucket } = &args.command {
        let payload = load_payload(&cache, adapter.cache_key())?.ok_or_else(|| {
            CliRunError::InvalidInput(format!(
                "No cached discovery data for {} in {}. Run `discoscrape sync` first.",
                site.as_str(),
                cache.dir().display()
            ))
        })?;
        return match bucket {
            None => print_json(&payload),
            Some(name) => match payload.buckets.get(name) {
                Some(records) => print_json(records),
                None => Err(CliRunError::InvalidInput(format!(
                    "No bucket '{}'. Cached buckets: {}",
                    name,
                    payload.buckets.keys().cloned().collect::<Vec<_>>().join(", ")
                ))),
            },
        };
    }

    let mut builder = PoliteClient::builder()
        .delay_ms(settings.delay_ms)
        .timeout_secs(settings.timeout_secs);
    if let Some(ua) = &settings.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    let client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let mut discovery = Discovery::new(&client, adapter.as_ref(), &cache)
        .with_options(settings.discovery.clone())
        .with_normalizer(settings.normalizer.clone());

    let cancel = discovery.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current page");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    match &args.command {
        Command::Sync => {
            let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
            let progress_cb = |task: &str, n: u32, total: u32| {
                let mut state = progress_state.borrow_mut();
                let pb = state.get_or_insert_with(|| progress_bar(total));
                pb.set_length(total as u64);
                pb.set_position(n as u64);
                pb.set_message(format!("Fetching {}", task));
            };
            let progress: Option<&dyn Fn(&str, u32, u32)> =
                if args.quiet { None } else { Some(&progress_cb) };
            let result = discovery.run(progress).await;
            if let Some(pb) = progress_state.borrow_mut().take() {
                pb.disable_steady_tick();
                pb.finish_and_clear();
            }
            let payload = result?;
            print_json(&payload)?;
            if !args.quiet {
                eprintln!(
                    "Synced {} records into {}",
                    payload.total_records(),
                    cache.dir().display()
                );
            }
        }
        Command::Search { query, page, all } => {
            let query = query.trim();
            if query.is_empty() {
                return Err(CliRunError::InvalidInput("Search query is empty.".to_string()));
            }
            let records = if *all {
                discovery.search_all(query, None).await?
            } else {
                discovery.search(query, page.unwrap_or(1)).await?
            };
            print_json(&records)?;
        }
        Command::Series { url } => print_json(&discovery.series(url).await?)?,
        Command::Chapter { url } => print_json(&discovery.chapter_images(url).await?)?,
        Command::Show { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("discoscrape").chain(argv.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn parse_site_names() {
        assert_eq!(parse_site("asura").unwrap(), Site::Asura);
        assert_eq!(parse_site("Madara").unwrap(), Site::Madara);
        assert_eq!(parse_site("mangadex").unwrap(), Site::MangaDex);
        assert!(parse_site("royalroad").is_err());
    }

    #[test]
    fn parse_page_rejects_zero_and_text() {
        assert_eq!(parse_page("2").unwrap(), 2);
        assert!(parse_page("0").is_err());
        assert!(parse_page("two").is_err());
    }

    #[test]
    fn search_page_and_all_conflict() {
        let parsed =
            Args::try_parse_from(["discoscrape", "search", "solo", "--page", "2", "--all"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let a = args(&["sync", "--site", "madara", "--proxy", "https://relay.test/", "-q"]);
        assert!(matches!(a.command, Command::Sync));
        assert_eq!(a.site, Some(Site::Madara));
        assert_eq!(a.proxies, ["https://relay.test/"]);
        assert!(a.quiet);
    }

    #[test]
    fn flags_override_config() -> Result<(), Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(
            r#"
            site = "asura"
            timeout_secs = 10
            request_delay_ms = 900
            bucket_cap = 25
            cache_dir = "from-config"
            relays = [{ url = "https://config-relay.test/" }]
            "#,
        )?;
        let a = args(&[
            "sync",
            "--site",
            "madara",
            "--timeout",
            "5",
            "--proxy",
            "https://flag-relay.test/",
        ]);
        let s = resolve_settings(&a, config)?;
        assert_eq!(s.site, Some(Site::Madara));
        assert_eq!(s.timeout_secs, 5);
        assert_eq!(s.delay_ms, 900);
        assert_eq!(s.discovery.bucket_cap, 25);
        assert_eq!(s.cache_dir, PathBuf::from("from-config"));
        assert_eq!(s.discovery.relays, [ProxyRelay::new("https://flag-relay.test/")]);
        Ok(())
    }

    #[test]
    fn invalid_config_site_and_relay_are_input_errors() -> Result<(), toml::de::Error> {
        let a = args(&["sync", "--cache-dir", "c"]);
        let bad_site: Config = toml::from_str(r#"site = "royalroad""#)?;
        assert!(matches!(resolve_settings(&a, bad_site), Err(CliRunError::InvalidInput(_))));
        let bad_relay: Config = toml::from_str(r#"relays = [{ url = "not a url" }]"#)?;
        assert!(matches!(resolve_settings(&a, bad_relay), Err(CliRunError::InvalidInput(_))));
        Ok(())
    }

    #[test]
    fn site_comes_from_target_url_then_base_url() -> Result<(), CliRunError> {
        let a = args(&["series", "https://kagane.org/manga/some-title/", "--cache-dir", "c"]);
        let s = resolve_settings(&a, Config::default())?;
        let (site, base) = site_and_base(&s, a.command.target_url())?;
        assert_eq!(site, Site::Madara);
        assert_eq!(base.as_deref(), Some("https://kagane.org"));

        let a = args(&["sync", "--base-url", "https://asuracomic.net", "--cache-dir", "c"]);
        let s = resolve_settings(&a, Config::default())?;
        assert_eq!(site_and_base(&s, None)?.0, Site::Asura);

        let a = args(&["sync", "--cache-dir", "c"]);
        let s = resolve_settings(&a, Config::default())?;
        assert_eq!(site_and_base(&s, None)?, (Site::Asura, None));
        Ok(())
    }

    #[test]
    fn mangadex_target_keeps_the_api_base() -> Result<(), CliRunError> {
        let a = args(&["series", "https://mangadex.org/title/32d76d19", "--cache-dir", "c"]);
        let s = resolve_settings(&a, Config::default())?;
        assert_eq!(site_and_base(&s, a.command.target_url())?, (Site::MangaDex, None));

        let config = Config {
            base_url: Some("https://asuracomic.net".into()),
            ..Config::default()
        };
        let s = resolve_settings(&a, config)?;
        assert_eq!(site_and_base(&s, a.command.target_url())?, (Site::MangaDex, None));

        let a = args(&[
            "chapter",
            "https://mangadex.org/chapter/ch-1",
            "--base-url",
            "https://api.mangadex.dev",
            "--cache-dir",
            "c",
        ]);
        let s = resolve_settings(&a, Config::default())?;
        assert_eq!(
            site_and_base(&s, a.command.target_url())?.1.as_deref(),
            Some("https://api.mangadex.dev")
        );
        Ok(())
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(CliRunError::Discovery(DiscoveryError::NoResults).exit_code(), 2);
        assert_eq!(
            CliRunError::Discovery(DiscoveryError::Fetch(FetchError::Blocked {
                url: "https://asuracomic.net".into()
            }))
            .exit_code(),
            2
        );
        let cache = || CacheError::InvalidKey { key: "..".into() };
        assert_eq!(CliRunError::Cache(cache()).exit_code(), 3);
        assert_eq!(CliRunError::Discovery(DiscoveryError::Cache(cache())).exit_code(), 3);
    }
}
