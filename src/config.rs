//! Optional config file loading. Search order: ./discoscrape.toml, then
//! $XDG_CONFIG_HOME/discoscrape/config.toml (or ~/.config/discoscrape/config.toml).

use crate::scraper::ProxyRelay;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Site profile: "asura", "madara" or "mangadex".
    pub site: Option<String>,
    /// Root URL of the site, e.g. a Madara mirror.
    pub base_url: Option<String>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Referer sent instead of `<target origin>/`.
    pub referer: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Delay in milliseconds between requests.
    pub request_delay_ms: Option<u64>,
    /// Attempts per route for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]); the last value is reused.
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Relays tried in order after the direct route fails.
    pub relays: Option<Vec<ProxyRelay>>,
    /// Words stripped from titles (whole word, case-sensitive).
    pub noise_tokens: Option<Vec<String>>,
    /// Lowercase fragments that reject a title as navigation text.
    pub reserved_words: Option<Vec<String>>,
    /// Maximum records kept per bucket.
    pub bucket_cap: Option<usize>,
    /// Page limit for paginated listings and `search --all`.
    pub max_pages: Option<u32>,
    /// Directory of the JSON cache files.
    pub cache_dir: Option<PathBuf>,
}

/// Read and parse one config file.
pub fn read_config(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

/// Search order: (1) ./discoscrape.toml, (2) $XDG_CONFIG_HOME/discoscrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("discoscrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("discoscrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return read_config(path).map(Some);
        }
    }
    Ok(None)
}
