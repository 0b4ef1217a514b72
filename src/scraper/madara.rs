//! Adapter for WordPress manga sites on the Madara theme (and the MangaStream-style card
//! markup many of them share). Listings come from `m_orderby` archive pages.

use crate::document::{
    collapse_whitespace, element_text, first_text, parse_selector, parse_selectors, RawDocument,
};
use crate::extract::{
    ChapterImageRules, CoverRule, FieldRules, ItemScan, LinkFilter, Strategy, StatusRule,
    TitleRule, CARD_NOISE, READER_IMAGES,
};
use crate::model::{ChapterLink, SeriesDetail, DEFAULT_STATUS};
use crate::normalize::resolve_url;
use crate::scraper::{
    url_with_query, BucketRule, FetchError, PageTask, Pagination, ParseError, Site, SiteAdapter,
};
use reqwest::Url;
use std::collections::HashSet;

pub const MADARA_DEFAULT_BASE: &str = "https://kagane.org";
const CACHE_KEY: &str = "madaraDiscoveryData";
/// Smallest common "posts per page" setting; a fuller page means there may be more.
const PAGE_SIZE: usize = 12;

/// Card container and title link pairs, newest theme layout first.
const LISTING_CARDS: &[(&str, &str)] = &[
    ("div.page-item-detail", "h3 a, .post-title a"),
    ("div.page-listing-item", "h3 a"),
    ("div.c-tabs-item__content", ".post-title a, h3 a"),
    ("div.listupd .bs .bsx", "a"),
    ("div.bsx", "a"),
    ("article.bs", "a"),
];

/// Chapter list containers, tried in order; the first non-empty one wins.
const CHAPTER_LISTS: &[&str] = &[
    "#chapterlist li a",
    ".wp-manga-chapter a",
    ".eph-num a",
    ".listing-chapters_wrap a",
    ".version-chap a",
    "ul.main li a",
];

const LAZY_COVER_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-cfsrc", "src"];

pub struct MadaraAdapter {
    base: String,
    host: Option<String>,
}

impl MadaraAdapter {
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        let host = Url::parse(&base)
            .ok()
            .and_then(|u| u.host_str().map(String::from));
        Self { base, host }
    }

    fn link_filter() -> LinkFilter {
        LinkFilter::new(&[], &["/chapter", "genre", "?s=", "m_orderby", "/page/", "#"])
    }

    fn card_fields() -> Result<FieldRules, ParseError> {
        Ok(FieldRules::titles(vec![
            TitleRule::descendant("h3 a")?,
            TitleRule::descendant(".post-title a")?,
            TitleRule::descendant(".post-title")?,
            TitleRule::descendant(".tt")?,
            TitleRule::without_noise(CARD_NOISE)?,
        ])
        .with_cover(CoverRule::new("img")?.with_attrs(LAZY_COVER_ATTRS))
        .with_status(StatusRule::new(
            ".mg_status .summary-content, .post-status .summary-content, .status",
            Some(DEFAULT_STATUS),
        )?))
    }

    fn listing_task(
        &self,
        name: &str,
        order: &str,
        ranked: bool,
        max_pages: u32,
    ) -> Result<PageTask, ParseError> {
        Ok(PageTask {
            name: name.to_string(),
            url: format!("{}/manga/page/{{page}}/?m_orderby={}", self.base, order),
            buckets: vec![BucketRule::new(name, self.listing_chain()?)],
            pagination: Some(Pagination {
                page_size: PAGE_SIZE,
                max_pages,
                ranked,
            }),
        })
    }

    fn single_page_task(&self, name: &str, url: String) -> Result<PageTask, ParseError> {
        Ok(PageTask {
            name: name.to_string(),
            url,
            buckets: vec![BucketRule::new(name, self.listing_chain()?)],
            pagination: None,
        })
    }
}

impl SiteAdapter for MadaraAdapter {
    fn site(&self) -> Site {
        Site::Madara
    }

    fn base_url(&self) -> &str {
        &self.base
    }

    fn cache_key(&self) -> &str {
        CACHE_KEY
    }

    /// Site name taken from the host: `www.kagane.org` gives `kagane`.
    fn reserved_fragments(&self) -> Vec<String> {
        self.host
            .as_deref()
            .map(|h| h.trim_start_matches("www."))
            .and_then(|h| h.split('.').next())
            .filter(|name| name.len() > 2)
            .map(|name| vec![name.to_lowercase()])
            .unwrap_or_default()
    }

    fn discovery_tasks(&self, max_pages: u32) -> Result<Vec<PageTask>, ParseError> {
        Ok(vec![
            self.single_page_task("trending", format!("{}/manga/?m_orderby=trending", self.base))?,
            self.single_page_task("popular", format!("{}/manga/?m_orderby=views", self.base))?,
            self.listing_task("latest", "latest", false, max_pages)?,
            self.listing_task("ranking", "rating", true, max_pages)?,
            self.single_page_task(
                "completed",
                format!("{}/?s=&post_type=wp-manga&status%5B%5D=end", self.base),
            )?,
        ])
    }

    fn search_url(&self, query: &str, page: u32) -> Result<String, FetchError> {
        let path = if page > 1 { format!("page/{}/", page) } else { String::new() };
        url_with_query(&self.base, &path, &[("s", query.trim()), ("post_type", "wp-manga")])
    }

    fn listing_chain(&self) -> Result<Vec<Box<dyn Strategy>>, ParseError> {
        LISTING_CARDS
            .iter()
            .map(|(card, link)| -> Result<Box<dyn Strategy>, ParseError> {
                Ok(Box::new(ItemScan::new(
                    *card,
                    card,
                    link,
                    Self::link_filter(),
                    Self::card_fields()?,
                )?))
            })
            .collect()
    }

    fn search_page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn series_detail(&self, doc: &RawDocument) -> Result<SeriesDetail, ParseError> {
        let title = first_text(doc, &["h1.entry-title", ".post-title h1", "h1"])?
            .ok_or_else(|| ParseError::malformed("series page has no title"))?;
        let root = doc.html().root_element();
        let cover_url = CoverRule::new(".thumb img, .summary_image img")?
            .with_attrs(LAZY_COVER_ATTRS)
            .apply(root)
            .or_else(|| CoverRule::new("img.wp-post-image").ok()?.apply(root))
            .map(|c| resolve_url(&c, &doc.origin()));
        let author = first_text(doc, &[".author-content a", ".author-content"])?;
        let status = first_text(
            doc,
            &[".post-status .summary-content", ".status .summary-content"],
        )?
        .unwrap_or_else(|| DEFAULT_STATUS.to_string());
        let summary = first_text(
            doc,
            &[".summary__content p", ".description-summary .summary__content"],
        )?;

        let labels = parse_selectors(&[".chapternum", ".chapter-manhwa-title"])?;
        let origin = doc.origin();
        let mut chapters = Vec::new();
        for sel in CHAPTER_LISTS {
            let sel = parse_selector(sel)?;
            let mut seen = HashSet::new();
            for a in doc.select(&sel) {
                let Some(href) = a.value().attr("href").map(str::trim).filter(|h| !h.is_empty())
                else {
                    continue;
                };
                let chapter_title = labels
                    .iter()
                    .flat_map(|l| a.select(l))
                    .map(|el| collapse_whitespace(&element_text(el)))
                    .find(|t| !t.is_empty())
                    .unwrap_or_else(|| collapse_whitespace(&element_text(a)));
                let url = resolve_url(href, &origin);
                if chapter_title.is_empty() || !seen.insert(url.clone()) {
                    continue;
                }
                chapters.push(ChapterLink {
                    title: chapter_title,
                    url,
                });
            }
            if !chapters.is_empty() {
                break;
            }
        }
        // Listed newest first.
        chapters.reverse();

        Ok(SeriesDetail {
            title,
            source_url: doc.base().to_string(),
            author,
            cover_url,
            status,
            summary,
            chapters,
        })
    }

    fn chapter_images(&self, doc: &RawDocument) -> Result<Vec<String>, ParseError> {
        let rules = ChapterImageRules::new(READER_IMAGES)?;
        let rules = match &self.host {
            Some(host) => rules.with_raw_scan(host, false),
            None => rules,
        };
        rules.extract(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::run_chain;
    use crate::normalize::Normalizer;

    #[test]
    fn listing_cards_prefer_lazy_cover_and_skip_chapter_links() -> Result<(), ParseError> {
        let page = r#"<div class="page-listing-item">
            <div class="page-item-detail manga">
              <div class="item-thumb"><a href="https://kagane.org/manga/iron-blood/">
                <img src="data:image/gif;base64,R0l"
                     data-src="https://kagane.org/wp-content/uploads/iron.jpg"></a></div>
              <div class="item-summary">
                <div class="post-title">
                  <h3><a href="https://kagane.org/manga/iron-blood/">Iron Blood</a></h3></div>
                <div class="list-chapter">
                  <a href="https://kagane.org/manga/iron-blood/chapter-40/">Chapter 40</a></div>
              </div>
            </div>
            <div class="page-item-detail manga">
              <div class="post-title">
                <h3><a href="https://kagane.org/manga/quiet-sea/">Quiet Sea</a></h3></div>
            </div>
        </div>"#;
        let adapter = MadaraAdapter::new(MADARA_DEFAULT_BASE);
        let doc = RawDocument::parse(page, "https://kagane.org/manga/")?;
        let found = run_chain(&adapter.listing_chain()?, &doc);
        let records = Normalizer::default()
            .with_reserved(adapter.reserved_fragments())
            .normalize_all(&found, &doc.origin());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "Iron Blood");
        assert_eq!(
            records[0].cover_url.as_deref(),
            Some("https://kagane.org/wp-content/uploads/iron.jpg")
        );
        assert_eq!(records[1].source_url, "https://kagane.org/manga/quiet-sea/");
        Ok(())
    }

    #[test]
    fn series_detail_reverses_chapters_into_reading_order() -> Result<(), ParseError> {
        let page = r#"<div class="post-title"><h1>Iron  Blood</h1></div>
            <div class="summary_image">
              <img class="wp-post-image" data-src="/wp-content/uploads/iron.jpg"
                   src="data:image/gif;base64,R0l"></div>
            <div class="author-content"><a href="/author/kim/">Kim</a></div>
            <div class="post-status"><div class="summary-content"> Completed </div></div>
            <div class="summary__content"><p>A knight returns.</p></div>
            <ul class="main version-chap">
              <li class="wp-manga-chapter">
                <a href="https://kagane.org/manga/iron-blood/chapter-2/">Chapter 2</a></li>
              <li class="wp-manga-chapter">
                <a href="https://kagane.org/manga/iron-blood/chapter-1/">Chapter 1</a></li>
              <li class="wp-manga-chapter">
                <a href="https://kagane.org/manga/iron-blood/chapter-1/">Chapter 1</a></li>
            </ul>"#;
        let adapter = MadaraAdapter::new(MADARA_DEFAULT_BASE);
        let doc = RawDocument::parse(page, "https://kagane.org/manga/iron-blood/")?;
        let detail = adapter.series_detail(&doc)?;
        assert_eq!(detail.title, "Iron Blood");
        assert_eq!(detail.author.as_deref(), Some("Kim"));
        assert_eq!(detail.status, "Completed");
        assert_eq!(detail.summary.as_deref(), Some("A knight returns."));
        assert_eq!(
            detail.cover_url.as_deref(),
            Some("https://kagane.org/wp-content/uploads/iron.jpg")
        );
        let titles: Vec<_> = detail.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Chapter 1", "Chapter 2"]);
        Ok(())
    }

    #[test]
    fn search_url_pages() -> Result<(), FetchError> {
        let adapter = MadaraAdapter::new("https://kagane.org/");
        assert_eq!(
            adapter.search_url("iron blood", 1)?,
            "https://kagane.org/?s=iron+blood&post_type=wp-manga"
        );
        assert_eq!(
            adapter.search_url("iron", 3)?,
            "https://kagane.org/page/3/?s=iron&post_type=wp-manga"
        );
        Ok(())
    }

    #[test]
    fn reserved_fragment_comes_from_host() {
        assert_eq!(
            MadaraAdapter::new("https://www.kagane.org").reserved_fragments(),
            ["kagane"]
        );
    }
}
