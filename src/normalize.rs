//! Candidate cleaning, URL resolution, and noise rejection.

use crate::document::collapse_whitespace;
use crate::model::{Candidate, Record, PLACEHOLDER_TITLE};
use reqwest::Url;

/// Words that leak into titles from card markup (chapter labels, type tags).
pub const DEFAULT_NOISE_TOKENS: &[&str] = &["Chapter", "MANHWA", "MANHUA", "MANGA"];

/// Lowercase fragments that mark navigation links rather than series titles.
pub const DEFAULT_RESERVED_WORDS: &[&str] = &["home", "series", "bookmark"];

/// Path or query fragments of links that look like series links but are not.
const EXCLUDED_URL_PATTERNS: &[&str] = &["/chapter/", "genre="];

/// Titles this short are badges or counters, not names.
const MIN_TITLE_CHARS: usize = 3;

/// True when `url` is a chapter link or a genre filter.
pub fn is_excluded_url(url: &str) -> bool {
    EXCLUDED_URL_PATTERNS.iter().any(|p| url.contains(p))
}

/// Resolve `href` against `base_origin`. Absolute URLs are returned unchanged,
/// protocol-relative ones take the base scheme, and anything else is joined to the
/// origin with exactly one `/`.
pub fn resolve_url(href: &str, base_origin: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    if let Some(rest) = href.strip_prefix("//") {
        let scheme = Url::parse(base_origin)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());
        return format!("{}://{}", scheme, rest);
    }
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    format!(
        "{}/{}",
        base_origin.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

/// Turns candidates into records. Pure: the same candidate always yields the same record,
/// and normalizing a record's candidate again is a no-op.
#[derive(Debug, Clone)]
pub struct Normalizer {
    noise_tokens: Vec<String>,
    reserved_words: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_NOISE_TOKENS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_RESERVED_WORDS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl Normalizer {
    /// Noise tokens match whole words, case-sensitively. Reserved words match as
    /// lowercase substrings of the cleaned title.
    pub fn new(noise_tokens: Vec<String>, reserved_words: Vec<String>) -> Self {
        Self {
            noise_tokens: noise_tokens
                .into_iter()
                .flat_map(|t| t.split_whitespace().map(String::from).collect::<Vec<_>>())
                .collect(),
            reserved_words: reserved_words
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// Add reserved words (e.g. site-name fragments).
    pub fn with_reserved(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        for word in extra {
            let word = word.trim().to_lowercase();
            if !word.is_empty() && !self.reserved_words.contains(&word) {
                self.reserved_words.push(word);
            }
        }
        self
    }

    pub fn noise_tokens(&self) -> &[String] {
        &self.noise_tokens
    }

    /// Collapse whitespace and drop noise-token words.
    pub fn clean_title(&self, raw: &str) -> String {
        collapse_whitespace(raw)
            .split(' ')
            .filter(|w| !w.is_empty() && !self.noise_tokens.iter().any(|t| t == w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when a cleaned title must not become a record.
    pub fn rejects_title(&self, cleaned: &str) -> bool {
        if cleaned.chars().count() < MIN_TITLE_CHARS {
            return true;
        }
        let lower = cleaned.to_lowercase();
        self.reserved_words.iter().any(|w| lower.contains(w.as_str()))
    }

    /// Normalize one candidate, or `None` when it is noise.
    ///
    /// A candidate without a title but with a cover becomes a placeholder record that a
    /// later pass over the same URL can complete.
    pub fn normalize(&self, candidate: &Candidate, base_origin: &str) -> Option<Record> {
        let source_url = resolve_url(&candidate.source_url, base_origin);
        if source_url.is_empty() || is_excluded_url(&source_url) {
            return None;
        }
        let cover_url = candidate
            .cover_url
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.starts_with("data:"))
            .map(|c| resolve_url(c, base_origin));
        // A literal placeholder title carries no information and reads as a missing one.
        let cleaned = candidate
            .title
            .as_deref()
            .map(|raw| self.clean_title(raw))
            .filter(|t| t != PLACEHOLDER_TITLE);
        let title = match cleaned {
            Some(cleaned) if self.rejects_title(&cleaned) => return None,
            Some(cleaned) => cleaned,
            None if cover_url.is_some() => PLACEHOLDER_TITLE.to_string(),
            None => return None,
        };
        let status = candidate
            .status
            .as_deref()
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty());
        Some(Record {
            title,
            source_url,
            cover_url,
            status,
            rank: None,
        })
    }

    /// Normalize a batch, dropping rejects and keeping order.
    pub fn normalize_all(&self, candidates: &[Candidate], base_origin: &str) -> Vec<Record> {
        candidates
            .iter()
            .filter_map(|c| self.normalize(c, base_origin))
            .collect()
    }
}
