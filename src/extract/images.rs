//! Chapter page images: a reader-container selector chain over the DOM, with a raw-text
//! URL scan for pages whose images only appear in script payloads.

use crate::document::{first_attr, parse_selectors, RawDocument};
use crate::normalize::resolve_url;
use crate::scraper::ParseError;
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;

/// Reader containers of common manga themes, most specific first.
pub const READER_IMAGES: &[&str] = &[
    "#readerarea img",
    ".reading-content img",
    ".vung-doc img",
    ".container-chapter-reader img",
    ".chapter-content img",
    ".entry-content img",
    ".text-left img",
    "article img",
];

const LAZY_FIRST: &[&str] = &["data-src", "data-lazy-src", "data-cfsrc", "src"];
const DOM_JUNK: &[&str] = &["/ads/", "ads.", "logo", "icon", "avatar"];
const RAW_JUNK: &[&str] = &["logo", "icon", "thumb", "avatar", "cover"];
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".avif", ".gif"];
const IMAGE_PATH_MARKERS: &[&str] = &["cdn", "img", "upload"];

fn looks_like_page(url: &str) -> bool {
    let lower = url.to_lowercase();
    if DOM_JUNK.iter().any(|j| lower.contains(j)) {
        return false;
    }
    IMAGE_EXTENSIONS.iter().any(|e| lower.contains(e))
        || IMAGE_PATH_MARKERS.iter().any(|m| lower.contains(m))
}

/// Ordered, de-duplicated page image extraction for one site.
#[derive(Debug, Clone)]
pub struct ChapterImageRules {
    chain: Vec<Selector>,
    /// Only raw-scanned URLs on this host are kept.
    image_host: Option<String>,
    raw_first: bool,
}

impl ChapterImageRules {
    pub fn new(chain: &[&str]) -> Result<Self, ParseError> {
        Ok(Self {
            chain: parse_selectors(chain)?,
            image_host: None,
            raw_first: false,
        })
    }

    /// Enable the raw-text scan for `host`. With `first` set it runs before the DOM chain.
    pub fn with_raw_scan(mut self, host: &str, first: bool) -> Self {
        self.image_host = Some(host.to_string());
        self.raw_first = first;
        self
    }

    pub fn extract(&self, doc: &RawDocument) -> Result<Vec<String>, ParseError> {
        let raw = |doc: &RawDocument| match &self.image_host {
            Some(host) => scan_image_urls(doc.raw(), host),
            None => Ok(Vec::new()),
        };
        if self.raw_first {
            let found = raw(doc)?;
            if !found.is_empty() {
                return Ok(found);
            }
            return Ok(self.from_dom(doc));
        }
        let found = self.from_dom(doc);
        if !found.is_empty() {
            return Ok(found);
        }
        raw(doc)
    }

    /// First selector of the chain that yields page images wins.
    fn from_dom(&self, doc: &RawDocument) -> Vec<String> {
        let origin = doc.origin();
        for sel in &self.chain {
            let mut seen = HashSet::new();
            let urls: Vec<String> = doc
                .select(sel)
                .filter_map(|img| first_attr(img, LAZY_FIRST))
                .filter(|src| !src.starts_with("data:") && looks_like_page(src))
                .map(|src| resolve_url(src, &origin))
                .filter(|url| seen.insert(url.clone()))
                .collect();
            if !urls.is_empty() {
                tracing::debug!(
                    selector = ?sel,
                    count = urls.len(),
                    "chapter images from reader container"
                );
                return urls;
            }
        }
        Vec::new()
    }
}

/// Every image URL in `raw` served from `host`, in first-seen order, minus site chrome.
pub fn scan_image_urls(raw: &str, host: &str) -> Result<Vec<String>, ParseError> {
    let re = Regex::new(r#"https?://[^"'\s\\<>]+\.(?:jpg|jpeg|png|webp|avif)"#).map_err(|e| {
        ParseError::Malformed {
            reason: e.to_string(),
        }
    })?;
    let mut seen = HashSet::new();
    Ok(re
        .find_iter(raw)
        .map(|m| m.as_str())
        .filter(|url| url_host(url) == Some(host))
        .filter(|url| {
            let lower = url.to_lowercase();
            !RAW_JUNK.iter().any(|j| lower.contains(j))
        })
        .filter(|url| seen.insert(url.to_string()))
        .map(String::from)
        .collect())
}

fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    rest.split(['/', '?', '#', ':']).next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_container_images_in_order_with_lazy_attrs() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            r#"<div class="reading-content">
                 <img src="data:image/gif;base64,R0l" data-src="https://cdn.example.com/ch1/01.jpg">
                 <img src="https://example.com/wp-content/uploads/logo.png">
                 <img data-lazy-src="/uploads/ch1/02.webp">
                 <img data-src="https://cdn.example.com/ch1/01.jpg">
               </div>"#,
            "https://example.com/manga/x/chapter-1/",
        )?;
        let rules = ChapterImageRules::new(READER_IMAGES)?;
        assert_eq!(
            rules.extract(&doc)?,
            [
                "https://cdn.example.com/ch1/01.jpg",
                "https://example.com/uploads/ch1/02.webp",
            ]
        );
        Ok(())
    }

    #[test]
    fn raw_scan_keeps_only_the_image_host() -> Result<(), ParseError> {
        let raw = concat!(
            r#"<script>self.__next_f.push([1,"#,
            r#""{\"url\":\"https://gg.asuracomic.net/storage/media/10/01.webp\"}"])</script>"#,
            r#"
            <img src="https://gg.asuracomic.net/storage/media/10/02.webp">
            <img src="https://gg.asuracomic.net/storage/media/logo.png">
            <img src="https://ads.example.net/banner.jpg">
            <img src="https://gg.asuracomic.net/storage/media/10/01.webp">"#
        );
        assert_eq!(
            scan_image_urls(raw, "gg.asuracomic.net")?,
            [
                "https://gg.asuracomic.net/storage/media/10/01.webp",
                "https://gg.asuracomic.net/storage/media/10/02.webp",
            ]
        );
        Ok(())
    }

    #[test]
    fn dom_chain_falls_back_to_raw_scan() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            r#"<main><script>
                var pages = ["https://gg.asuracomic.net/storage/media/7/001.jpg"];
            </script></main>"#,
            "https://asuracomic.net/series/x/chapter/1",
        )?;
        let rules =
            ChapterImageRules::new(READER_IMAGES)?.with_raw_scan("gg.asuracomic.net", false);
        assert_eq!(
            rules.extract(&doc)?,
            ["https://gg.asuracomic.net/storage/media/7/001.jpg"]
        );
        Ok(())
    }
}
