//! Asura Scans adapter. A Next.js site: discovery buckets come from the home page
//! carousel and its "Popular Today" / "Latest Update" sections; chapter images live in
//! hydration scripts rather than the DOM.

use crate::document::{
    collapse_whitespace, element_text, first_text, parse_selector, RawDocument,
};
use crate::extract::{
    AnchorScan, ChapterImageRules, CoverRule, DataIslandScan, FieldRules, ItemScan, LinkFilter,
    SectionScan, Strategy, StatusRule, TitleRule, READER_IMAGES,
};
use crate::model::{ChapterLink, SeriesDetail, DEFAULT_STATUS};
use crate::normalize::resolve_url;
use crate::scraper::{
    strip_title_site_suffix, url_with_query, BucketRule, FetchError, PageTask, Pagination,
    ParseError, Site, SiteAdapter,
};
use scraper::ElementRef;
use std::collections::HashSet;

pub const ASURA_BASE: &str = "https://asuracomic.net";
/// Host that serves chapter pages; everything else in script payloads is site chrome.
pub const ASURA_IMAGE_HOST: &str = "gg.asuracomic.net";
const CACHE_KEY: &str = "manhwaDiscoveryData";
const PAGE_SIZE: usize = 15;
const TITLE_SUFFIXES: &[&str] = &[" - Asura Scans", " | Asura Scans", " - Asura Comic"];

pub struct AsuraAdapter {
    base: String,
}

impl AsuraAdapter {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn section(&self, name: &str, label: &str) -> Result<Box<dyn Strategy>, ParseError> {
        Ok(Box::new(SectionScan::new(
            name,
            "div.text-white",
            "h3",
            label,
            LinkFilter::series(),
            FieldRules::card()?,
        )?))
    }

    /// Carousel slides carry the title in `.ellipsis a` and the cover as the poster image.
    fn trending_slides(&self) -> Result<Box<dyn Strategy>, ParseError> {
        let fields = FieldRules::titles(vec![
            TitleRule::descendant(".ellipsis a")?,
            TitleRule::descendant("span.font-bold")?,
        ])
        .with_cover(CoverRule::new(r#"img[alt="poster"]"#)?)
        .with_status(StatusRule::new("span.status, .status", Some(DEFAULT_STATUS))?);
        Ok(Box::new(ItemScan::new(
            "trending-slides",
            "li.slide",
            r#"a[href*="series/"]"#,
            LinkFilter::series(),
            fields,
        )?))
    }

    /// Chapter hrefs are relative to `/series/` (e.g. `solo-leveling-a4b483cd/chapter/200`).
    fn chapter_url(&self, href: &str) -> String {
        if href.starts_with("http") || href.starts_with("//") || href.starts_with('/') {
            resolve_url(href, &self.base)
        } else {
            format!("{}/series/{}", self.base, href)
        }
    }
}

/// Series objects in the home page's hydration payload, for when the section markup
/// is not rendered server-side.
fn home_islands(name: &str) -> DataIslandScan {
    DataIslandScan::new(name, LinkFilter::series(), "series/")
}

/// Label/value metadata cells: a div whose first and last direct `h3` children are the
/// label ("Status", "Author") and its value.
fn metadata_value(doc: &RawDocument, label: &str) -> Result<Option<String>, ParseError> {
    let div = parse_selector("div")?;
    for cell in doc.select(&div) {
        let headings: Vec<ElementRef<'_>> = cell
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| c.value().name() == "h3")
            .collect();
        if headings.len() < 2 {
            continue;
        }
        let name = collapse_whitespace(&element_text(headings[0]));
        if !name.contains(label) {
            continue;
        }
        let value = collapse_whitespace(&element_text(headings[headings.len() - 1]));
        if !value.is_empty() && value != "_" {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

impl SiteAdapter for AsuraAdapter {
    fn site(&self) -> Site {
        Site::Asura
    }

    fn base_url(&self) -> &str {
        &self.base
    }

    fn cache_key(&self) -> &str {
        CACHE_KEY
    }

    fn reserved_fragments(&self) -> Vec<String> {
        vec!["asura".to_string()]
    }

    fn discovery_tasks(&self, max_pages: u32) -> Result<Vec<PageTask>, ParseError> {
        Ok(vec![
            PageTask {
                name: "home".to_string(),
                url: format!("{}/", self.base),
                buckets: vec![
                    BucketRule::new("trending", vec![self.trending_slides()?]),
                    BucketRule::new(
                        "popular",
                        vec![
                            self.section("popular-today", "Popular Today")?,
                            Box::new(home_islands("popular-data")),
                        ],
                    ),
                    BucketRule::new(
                        "latest",
                        vec![
                            self.section("latest-update", "Latest Update")?,
                            Box::new(home_islands("latest-data")),
                        ],
                    ),
                ],
                pagination: None,
            },
            PageTask {
                name: "ranking".to_string(),
                url: format!("{}/series?page={{page}}&order=rating", self.base),
                buckets: vec![BucketRule::new("ranking", self.listing_chain()?)],
                pagination: Some(Pagination {
                    page_size: PAGE_SIZE,
                    max_pages,
                    ranked: true,
                }),
            },
        ])
    }

    fn search_url(&self, query: &str, page: u32) -> Result<String, FetchError> {
        url_with_query(
            &self.base,
            "series",
            &[("page", &page.max(1).to_string()), ("name", query.trim())],
        )
    }

    fn listing_chain(&self) -> Result<Vec<Box<dyn Strategy>>, ParseError> {
        Ok(vec![
            Box::new(
                AnchorScan::new("series-grid", LinkFilter::series(), FieldRules::card()?)?
                    .scoped("div.grid")?
                    .with_anchor(r#"a[href*="series/"]"#)?,
            ),
            Box::new(
                AnchorScan::new("series-anchors", LinkFilter::series(), FieldRules::card()?)?
                    .with_anchor(r#"a[href*="series/"]"#)?,
            ),
            Box::new(DataIslandScan::new("next-data", LinkFilter::series(), "series/")),
        ])
    }

    fn search_page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn series_detail(&self, doc: &RawDocument) -> Result<SeriesDetail, ParseError> {
        let title = match first_text(doc, &["span.text-xl.font-bold", "h1"])? {
            Some(t) => t,
            None => first_text(doc, &["title"])?
                .map(|t| strip_title_site_suffix(&t, TITLE_SUFFIXES))
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ParseError::malformed("series page has no title"))?,
        };
        let cover_url = CoverRule::new(r#"img[alt="poster"]"#)?
            .apply(doc.html().root_element())
            .map(|c| resolve_url(&c, &self.base));
        let status = metadata_value(doc, "Status")?.unwrap_or_else(|| DEFAULT_STATUS.to_string());
        let author = metadata_value(doc, "Author")?;

        let paragraphs = parse_selector("span.font-medium.text-sm p")?;
        let summary: Vec<String> = doc
            .select(&paragraphs)
            .map(|p| collapse_whitespace(&element_text(p)))
            .filter(|p| !p.is_empty())
            .collect();
        let summary = (!summary.is_empty()).then(|| summary.join("\n\n"));

        let links = parse_selector("div.overflow-y-auto a[href]")?;
        let name = parse_selector("h3.text-sm")?;
        let date = parse_selector("h3.text-xs")?;
        let mut seen = HashSet::new();
        let mut chapters = Vec::new();
        for a in doc.select(&links) {
            let Some(href) = a.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
                continue;
            };
            let url = self.chapter_url(href);
            if !seen.insert(url.clone()) {
                continue;
            }
            let mut chapter_title = a
                .select(&name)
                .map(|h| collapse_whitespace(&element_text(h)))
                .find(|t| !t.is_empty())
                .unwrap_or_else(|| collapse_whitespace(&element_text(a)));
            if let Some(d) = a
                .select(&date)
                .map(|h| collapse_whitespace(&element_text(h)))
                .find(|t| !t.is_empty())
            {
                chapter_title = format!("{} ({})", chapter_title, d);
            }
            chapters.push(ChapterLink {
                title: chapter_title,
                url,
            });
        }

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
        ChapterImageRules::new(READER_IMAGES)?
            .with_raw_scan(ASURA_IMAGE_HOST, true)
            .extract(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::run_chain;
    use crate::merge::merge_all;
    use crate::normalize::Normalizer;

    const HOME: &str = r#"<html><body>
<ul class="slider">
  <li class="slide">
    <a href="https://asuracomic.net/series/trend-one-01">
      <img alt="poster" src="https://gg.asuracomic.net/storage/t1.webp"></a>
    <div class="ellipsis">
      <a href="https://asuracomic.net/series/trend-one-01">Trend One</a></div></li>
  <li class="slide">
    <a href="https://asuracomic.net/series/trend-two-02">
      <img alt="poster" src="https://gg.asuracomic.net/storage/t2.webp"></a>
    <div class="ellipsis">
      <a href="https://asuracomic.net/series/trend-two-02">Trend Two</a></div>
    <span class="status">Completed</span></li>
</ul>
<div class="text-white pt-2">
  <h3>Popular Today</h3>
  <a href="/series/pop-one-03"><img src="https://gg.asuracomic.net/storage/p1.webp">
    <span class="font-bold">Pop One</span></a>
</div>
<div class="text-white">
  <h3>Latest Update</h3>
  <div class="grid">
    <a href="/series/latest-one-04"><span class="font-bold">Latest One</span></a>
    <a href="/series/latest-one-04/chapter/12">Chapter 12</a>
    <a href="/?genre=action">Action</a>
  </div>
</div>
</body></html>"#;

    fn bucket(
        adapter: &AsuraAdapter,
        doc: &RawDocument,
        name: &str,
    ) -> Result<Vec<String>, ParseError> {
        let tasks = adapter.discovery_tasks(1)?;
        let rule = tasks[0]
            .buckets
            .iter()
            .find(|b| b.bucket == name)
            .ok_or_else(|| ParseError::malformed("bucket missing"))?;
        let normalizer = Normalizer::default().with_reserved(adapter.reserved_fragments());
        let records = normalizer.normalize_all(&run_chain(&rule.chain, doc), &doc.origin());
        Ok(records.into_iter().map(|r| r.title).collect())
    }

    #[test]
    fn home_sections_fill_their_own_buckets() -> Result<(), ParseError> {
        let adapter = AsuraAdapter::new(ASURA_BASE);
        let doc = RawDocument::parse(HOME, "https://asuracomic.net/")?;
        assert_eq!(bucket(&adapter, &doc, "trending")?, ["Trend One", "Trend Two"]);
        assert_eq!(bucket(&adapter, &doc, "popular")?, ["Pop One"]);
        assert_eq!(bucket(&adapter, &doc, "latest")?, ["Latest One"]);
        Ok(())
    }

    #[test]
    fn home_without_sections_reads_the_flight_payload() -> Result<(), ParseError> {
        let page = concat!(
            r#"<html><body><div id="root"></div><script>self.__next_f.push([1,"#,
            r#""5:[{\"name\":\"Island Saga\",\"slug\":\"island-series-1a2b\"}]\n"])"#,
            r#"</script></body></html>"#
        );
        let adapter = AsuraAdapter::new(ASURA_BASE);
        let doc = RawDocument::parse(page, "https://asuracomic.net/")?;
        assert_eq!(bucket(&adapter, &doc, "latest")?, ["Island Saga"]);
        assert_eq!(bucket(&adapter, &doc, "popular")?, ["Island Saga"]);
        assert!(bucket(&adapter, &doc, "trending")?.is_empty());

        let tasks = adapter.discovery_tasks(1)?;
        let latest = tasks[0]
            .buckets
            .iter()
            .find(|b| b.bucket == "latest")
            .ok_or_else(|| ParseError::malformed("bucket missing"))?;
        let found = run_chain(&latest.chain, &doc);
        let records = Normalizer::default().normalize_all(&found, &doc.origin());
        assert_eq!(
            records[0].source_url,
            "https://asuracomic.net/series/island-series-1a2b"
        );
        Ok(())
    }

    #[test]
    fn search_grid_merges_split_title_and_cover() -> Result<(), ParseError> {
        let page = r#"<div class="grid grid-cols-2">
            <a href="series/alpha-1"><span class="font-bold">Alpha Story</span></a>
            <a href="series/alpha-1"><img src="https://gg.asuracomic.net/storage/alpha.webp"></a>
            <a href="series/beta-2"><img src="https://gg.asuracomic.net/storage/beta.webp">
              <span class="font-bold">Beta Story</span></a>
            <a href="series/gamma-3"><span class="font-bold">Gamma Story</span></a>
            <a href="series/delta-4"><span class="font-bold">Delta Story</span>
              <span class="status">Hiatus</span></a>
        </div>"#;
        let adapter = AsuraAdapter::new(ASURA_BASE);
        let doc = RawDocument::parse(page, "https://asuracomic.net/series?page=1&name=story")?;
        let found = run_chain(&adapter.listing_chain()?, &doc);
        assert_eq!(found.len(), 5);
        let mut records = Vec::new();
        merge_all(&mut records, Normalizer::default().normalize_all(&found, &doc.origin()));
        assert_eq!(records.len(), 4);
        let alpha = &records[0];
        assert_eq!(alpha.title, "Alpha Story");
        assert_eq!(alpha.source_url, "https://asuracomic.net/series/alpha-1");
        assert_eq!(
            alpha.cover_url.as_deref(),
            Some("https://gg.asuracomic.net/storage/alpha.webp")
        );
        assert_eq!(records[3].status.as_deref(), Some("Hiatus"));
        Ok(())
    }

    #[test]
    fn search_url_encodes_query() -> Result<(), FetchError> {
        let adapter = AsuraAdapter::new("https://asuracomic.net/");
        assert_eq!(
            adapter.search_url("solo leveling", 2)?,
            "https://asuracomic.net/series?page=2&name=solo+leveling"
        );
        Ok(())
    }

    #[test]
    fn series_detail_reads_metadata_and_chapters() -> Result<(), ParseError> {
        let page = r#"<html><head><title>Solo Leveling - Asura Scans</title></head><body>
            <img alt="poster" src="https://gg.asuracomic.net/storage/media/sl.webp">
            <span class="text-xl font-bold">Solo Leveling</span>
            <div class="bg-[#343434]"><h3>Status</h3><h3>Completed</h3></div>
            <div class="grid">
              <div><h3>Author</h3><h3>Chugong</h3></div>
              <div><h3>Artist</h3><h3>_</h3></div>
            </div>
            <span class="font-medium text-sm">
              <p>10 years ago, after the Gate</p><p>opened.</p></span>
            <div class="overflow-y-auto">
              <a href="solo-leveling-a4b483cd/chapter/200">
                <h3 class="text-sm">Chapter  200</h3><h3 class="text-xs">March 1st 2024</h3></a>
              <a href="solo-leveling-a4b483cd/chapter/199"><h3 class="text-sm">Chapter 199</h3></a>
            </div></body></html>"#;
        let adapter = AsuraAdapter::new(ASURA_BASE);
        let doc = RawDocument::parse(page, "https://asuracomic.net/series/solo-leveling-a4b483cd")?;
        let detail = adapter.series_detail(&doc)?;
        assert_eq!(detail.title, "Solo Leveling");
        assert_eq!(detail.status, "Completed");
        assert_eq!(detail.author.as_deref(), Some("Chugong"));
        assert_eq!(
            detail.summary.as_deref(),
            Some("10 years ago, after the Gate\n\nopened.")
        );
        assert_eq!(detail.chapters.len(), 2);
        assert_eq!(detail.chapters[0].title, "Chapter 200 (March 1st 2024)");
        assert_eq!(
            detail.chapters[0].url,
            "https://asuracomic.net/series/solo-leveling-a4b483cd/chapter/200"
        );
        Ok(())
    }

    #[test]
    fn series_detail_without_heading_uses_page_title() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            concat!(
                "<html><head><title>Nano Machine - Asura Scans</title></head>",
                "<body><p>x</p></body></html>"
            ),
            "https://asuracomic.net/series/nano-machine-1f2e",
        )?;
        let detail = AsuraAdapter::new(ASURA_BASE).series_detail(&doc)?;
        assert_eq!(detail.title, "Nano Machine");
        assert_eq!(detail.status, DEFAULT_STATUS);
        assert!(detail.chapters.is_empty());
        Ok(())
    }
}
