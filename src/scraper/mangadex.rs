//! MangaDex adapter. Everything comes from the public JSON API: listings and search are
//! `/manga` queries, series chapters come from a separate feed, and chapter pages from
//! the at-home image server.

use crate::document::RawDocument;
use crate::extract::Strategy;
use crate::model::{Candidate, ChapterLink, SeriesDetail, DEFAULT_STATUS};
use crate::scraper::{
    url_with_query, BucketRule, FetchError, PageTask, Pagination, ParseError, Site, SiteAdapter,
};
use chrono::DateTime;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub const MANGADEX_API: &str = "https://api.mangadex.org";
const SITE_BASE: &str = "https://mangadex.org";
const COVER_HOST: &str = "https://uploads.mangadex.org/covers";
const CACHE_KEY: &str = "mangadexDiscoveryData";
const PAGE_SIZE: usize = 20;
const FEED_LIMIT: &str = "500";
const UNKNOWN_TITLE: &str = "Unknown Title";
/// Ratings included in listings and search.
const CONTENT_RATINGS: &[&str] = &["safe", "suggestive", "erotica"];

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    #[serde(default)]
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Default, Deserialize)]
struct MangaAttributes {
    #[serde(default, deserialize_with = "localized_map")]
    title: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "localized_map")]
    description: BTreeMap<String, String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHome {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
}

/// Language-keyed strings. An empty map sometimes arrives as `[]`, and non-string
/// entries are dropped.
fn localized_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(lang, v)| v.as_str().map(|s| (lang, s.trim().to_string())))
            .filter(|(_, s)| !s.is_empty())
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// English when present, else the first language in key order.
fn localized(map: &BTreeMap<String, String>) -> Option<String> {
    map.get("en").or_else(|| map.values().next()).cloned()
}

impl MangaData {
    fn relationship(&self, kind: &str) -> Option<&Value> {
        self.relationships
            .iter()
            .find(|r| r.rel_type == kind)
            .and_then(|r| r.attributes.as_ref())
    }

    fn cover_url(&self) -> Option<String> {
        self.relationship("cover_art")
            .and_then(|a| str_field(a, "fileName"))
            .map(|file| cover_url(&self.id, file))
    }

    fn status(&self) -> Option<String> {
        self.attributes
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(display_status)
    }
}

/// Public page of a title.
pub fn title_url(id: &str) -> String {
    format!("{}/title/{}", SITE_BASE, id)
}

/// Thumbnail of a cover file.
pub fn cover_url(manga_id: &str, file_name: &str) -> String {
    format!("{}/{}/{}.256.jpg", COVER_HOST, manga_id, file_name)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// API statuses are lowercase (`ongoing`, `hiatus`).
fn display_status(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn shape_error(what: &str, e: serde_json::Error) -> ParseError {
    ParseError::DataIsland {
        reason: format!("{}: {}", what, e),
    }
}

/// The body of an API response. Error responses carry `"result": "error"`.
fn api_body(doc: &RawDocument) -> Result<Value, ParseError> {
    let body = doc.json()?;
    if body["result"] == "error" {
        let detail = body["errors"][0]["detail"]
            .as_str()
            .unwrap_or("error response")
            .to_string();
        return Err(ParseError::DataIsland { reason: detail });
    }
    Ok(body)
}

fn api_data(doc: &RawDocument) -> Result<Value, ParseError> {
    let mut body = api_body(doc)?;
    match body.get_mut("data") {
        Some(data) => Ok(data.take()),
        None => Err(ParseError::DataIsland {
            reason: "response has no data".to_string(),
        }),
    }
}

/// Entries of a collection response. Entries that do not fit `T` are skipped.
fn api_list<T: DeserializeOwned>(doc: &RawDocument, what: &str) -> Result<Vec<T>, ParseError> {
    let Value::Array(items) = api_data(doc)? else {
        return Err(ParseError::DataIsland {
            reason: format!("{} is not a list", what),
        });
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(what, error = %e, "skipping malformed entry");
                None
            }
        })
        .collect())
}

/// Path segment following one of `markers` (e.g. the id in `/title/{id}/slug`).
fn id_after(url: &str, markers: &[&str]) -> Result<String, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidUrl {
        input: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| invalid("URL has no path"))?;
    while let Some(segment) = segments.next() {
        if markers.contains(&segment) {
            return segments
                .next()
                .filter(|id| !id.is_empty())
                .map(String::from)
                .ok_or_else(|| invalid("missing id"));
        }
    }
    Err(invalid(&format!("expected a /{}/<id> URL", markers[0])))
}

/// Reads the `data` array of a `/manga` list response.
#[derive(Debug, Clone)]
pub struct MangaListScan {
    name: String,
}

impl MangaListScan {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Strategy for MangaListScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
        Ok(api_list::<MangaData>(doc, "manga list")?
            .into_iter()
            .map(|manga| Candidate {
                source_url: title_url(&manga.id),
                title: localized(&manga.attributes.title),
                cover_url: manga.cover_url(),
                status: manga.status(),
            })
            .collect())
    }
}

pub struct MangaDexAdapter {
    base: String,
}

impl MangaDexAdapter {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// A `/manga` listing with the given filter and order; `{offset}` is filled per page.
    fn listing_url(&self, filter: &str) -> String {
        let ratings: String = CONTENT_RATINGS
            .iter()
            .map(|r| format!("&contentRating[]={}", r))
            .collect();
        format!(
            "{}/manga?limit={}&offset={{offset}}&includes[]=cover_art{}&{}",
            self.base, PAGE_SIZE, ratings, filter
        )
    }

    fn listing_task(&self, name: &str, filter: &str, pagination: Option<Pagination>) -> PageTask {
        let scan: Box<dyn Strategy> = Box::new(MangaListScan::new(format!("{}-list", name)));
        PageTask {
            name: name.to_string(),
            url: self.listing_url(filter),
            buckets: vec![BucketRule::new(name, vec![scan])],
            pagination,
        }
    }
}

impl SiteAdapter for MangaDexAdapter {
    fn site(&self) -> Site {
        Site::MangaDex
    }

    fn base_url(&self) -> &str {
        &self.base
    }

    fn cache_key(&self) -> &str {
        CACHE_KEY
    }

    fn reserved_fragments(&self) -> Vec<String> {
        vec!["mangadex".to_string()]
    }

    fn discovery_tasks(&self, max_pages: u32) -> Result<Vec<PageTask>, ParseError> {
        Ok(vec![
            self.listing_task("popular", "order[followedCount]=desc", None),
            self.listing_task("latest", "order[latestUploadedChapter]=desc", None),
            self.listing_task(
                "completed",
                "status[]=completed&order[followedCount]=desc",
                None,
            ),
            self.listing_task(
                "ranking",
                "order[rating]=desc",
                Some(Pagination {
                    page_size: PAGE_SIZE,
                    max_pages,
                    ranked: true,
                }),
            ),
        ])
    }

    fn search_url(&self, query: &str, page: u32) -> Result<String, FetchError> {
        let limit = PAGE_SIZE.to_string();
        let offset = ((page.max(1) as usize - 1) * PAGE_SIZE).to_string();
        let mut pairs = vec![
            ("title", query.trim()),
            ("limit", limit.as_str()),
            ("offset", offset.as_str()),
            ("includes[]", "cover_art"),
            ("includes[]", "author"),
        ];
        pairs.extend(CONTENT_RATINGS.iter().map(|r| ("contentRating[]", *r)));
        pairs.push(("order[relevance]", "desc"));
        url_with_query(&self.base, "manga", &pairs)
    }

    fn listing_chain(&self) -> Result<Vec<Box<dyn Strategy>>, ParseError> {
        Ok(vec![Box::new(MangaListScan::new("manga-list"))])
    }

    fn search_page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Accepts a public title URL or an API manga URL.
    fn detail_url(&self, url: &str) -> Result<String, FetchError> {
        let id = id_after(url, &["title", "manga"])?;
        url_with_query(
            &self.base,
            &format!("manga/{}", id),
            &[("includes[]", "cover_art"), ("includes[]", "author")],
        )
    }

    fn series_detail(&self, doc: &RawDocument) -> Result<SeriesDetail, ParseError> {
        let manga: MangaData =
            serde_json::from_value(api_data(doc)?).map_err(|e| shape_error("manga", e))?;
        Ok(SeriesDetail {
            title: localized(&manga.attributes.title)
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            source_url: title_url(&manga.id),
            author: manga
                .relationship("author")
                .and_then(|a| str_field(a, "name"))
                .map(String::from),
            cover_url: manga.cover_url(),
            status: manga
                .status()
                .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            summary: localized(&manga.attributes.description),
            chapters: Vec::new(),
        })
    }

    fn chapter_feed_url(&self, detail: &SeriesDetail) -> Option<String> {
        let id = id_after(&detail.source_url, &["title"]).ok()?;
        url_with_query(
            &self.base,
            &format!("manga/{}/feed", id),
            &[
                ("translatedLanguage[]", "en"),
                ("order[chapter]", "asc"),
                ("limit", FEED_LIMIT),
                ("includes[]", "scanlation_group"),
            ],
        )
        .ok()
    }

    /// Chapter titles read `Ch. 12 - Name [Group] (Mar 1, 2024)`; chapters without a
    /// number are oneshots.
    fn chapter_feed(&self, doc: &RawDocument) -> Result<Vec<ChapterLink>, ParseError> {
        let items = api_list::<Value>(doc, "chapter feed")?;
        Ok(items
            .iter()
            .filter_map(|item| {
                let id = str_field(item, "id")?;
                let attributes = &item["attributes"];
                let mut title = format!(
                    "Ch. {}",
                    str_field(attributes, "chapter").unwrap_or("Oneshot")
                );
                if let Some(name) = str_field(attributes, "title") {
                    title.push_str(&format!(" - {}", name));
                }
                let group = item["relationships"]
                    .as_array()
                    .and_then(|rels| rels.iter().find(|r| r["type"] == "scanlation_group"))
                    .and_then(|g| str_field(&g["attributes"], "name"));
                if let Some(group) = group {
                    title.push_str(&format!(" [{}]", group));
                }
                if let Some(date) = str_field(attributes, "publishAt")
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                {
                    title.push_str(&format!(" ({})", date.format("%b %-d, %Y")));
                }
                Some(ChapterLink {
                    title,
                    url: format!("{}/chapter/{}", SITE_BASE, id),
                })
            })
            .collect())
    }

    fn chapter_images_url(&self, url: &str) -> Result<String, FetchError> {
        let id = id_after(url, &["chapter", "server"])?;
        Ok(format!("{}/at-home/server/{}", self.base, id))
    }

    /// Full-quality pages: `{baseUrl}/data/{hash}/{file}`.
    fn chapter_images(&self, doc: &RawDocument) -> Result<Vec<String>, ParseError> {
        let at_home: AtHome =
            serde_json::from_value(api_body(doc)?).map_err(|e| shape_error("at-home", e))?;
        let server = at_home.base_url.trim_end_matches('/');
        Ok(at_home
            .chapter
            .data
            .iter()
            .map(|file| format!("{}/data/{}/{}", server, at_home.chapter.hash, file))
            .collect())
    }
}
