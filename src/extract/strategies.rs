//! Strategy kinds: anchor scans, header-scoped section scans, card scans, and the JSON
//! island walker.

use super::rules::{anchor_href, FieldRules};
use super::Strategy;
use crate::document::{collapse_whitespace, element_text, parse_selector, RawDocument};
use crate::model::Candidate;
use crate::scraper::ParseError;
use scraper::{ElementRef, Selector};
use serde_json::Value;
use std::collections::HashSet;

/// Which hrefs count as series links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFilter {
    /// At least one must be contained in the href (empty accepts everything).
    pub include: Vec<String>,
    /// None may be contained in the href.
    pub exclude: Vec<String>,
}

impl LinkFilter {
    /// Series links: contain `series/`, never a chapter or genre filter.
    pub fn series() -> Self {
        Self::new(&["series/"], &["/chapter/", "genre="])
    }

    pub fn new(include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn accepts(&self, href: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| href.contains(p.as_str()));
        included && !self.exclude.iter().any(|p| href.contains(p.as_str()))
    }
}

/// Candidates for every accepted anchor under `root`, skipping anchors already seen.
fn scan_anchors(
    root: ElementRef<'_>,
    anchor: &Selector,
    filter: &LinkFilter,
    fields: &FieldRules,
    seen: &mut HashSet<ego_tree::NodeId>,
) -> Vec<Candidate> {
    root.select(anchor)
        .filter(|a| seen.insert(a.id()))
        .filter_map(|a| {
            let href = anchor_href(a)?;
            filter.accepts(href).then(|| fields.candidate(a, href))
        })
        .collect()
}

/// Anchor-first scan: every anchor whose href passes the filter becomes a candidate
/// with fields read from the anchor itself. Optionally limited to `scope` containers.
#[derive(Debug, Clone)]
pub struct AnchorScan {
    name: String,
    scope: Option<Selector>,
    anchor: Selector,
    filter: LinkFilter,
    fields: FieldRules,
}

impl AnchorScan {
    pub fn new(
        name: impl Into<String>,
        filter: LinkFilter,
        fields: FieldRules,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            name: name.into(),
            scope: None,
            anchor: parse_selector("a[href]")?,
            filter,
            fields,
        })
    }

    pub fn scoped(mut self, scope: &str) -> Result<Self, ParseError> {
        self.scope = Some(parse_selector(scope)?);
        Ok(self)
    }

    pub fn with_anchor(mut self, anchor: &str) -> Result<Self, ParseError> {
        self.anchor = parse_selector(anchor)?;
        Ok(self)
    }
}

impl Strategy for AnchorScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
        let mut seen = HashSet::new();
        let root = doc.html().root_element();
        match &self.scope {
            None => Ok(scan_anchors(root, &self.anchor, &self.filter, &self.fields, &mut seen)),
            Some(scope) => Ok(doc
                .select(scope)
                .flat_map(|s| scan_anchors(s, &self.anchor, &self.filter, &self.fields, &mut seen))
                .collect()),
        }
    }
}

/// Header-scoped scan: find containers whose header text contains a label (e.g.
/// "Latest Update") and scan only their anchors. When matched containers nest, the
/// innermost one that holds accepted anchors wins.
#[derive(Debug, Clone)]
pub struct SectionScan {
    name: String,
    container: Selector,
    header: Selector,
    label: String,
    anchor: Selector,
    filter: LinkFilter,
    fields: FieldRules,
}

impl SectionScan {
    pub fn new(
        name: impl Into<String>,
        container: &str,
        header: &str,
        label: &str,
        filter: LinkFilter,
        fields: FieldRules,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            name: name.into(),
            container: parse_selector(container)?,
            header: parse_selector(header)?,
            label: label.to_lowercase(),
            anchor: parse_selector("a[href]")?,
            filter,
            fields,
        })
    }

    fn has_label(&self, container: ElementRef<'_>) -> bool {
        container
            .select(&self.header)
            .any(|h| collapse_whitespace(&element_text(h)).to_lowercase().contains(&self.label))
    }
}

impl Strategy for SectionScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
        let sections: Vec<(ElementRef<'_>, Vec<Candidate>)> = doc
            .select(&self.container)
            .filter(|c| self.has_label(*c))
            .map(|c| {
                let mut seen = HashSet::new();
                (c, scan_anchors(c, &self.anchor, &self.filter, &self.fields, &mut seen))
            })
            .filter(|(_, found)| !found.is_empty())
            .collect();
        let innermost = sections.iter().find(|(outer, _)| {
            !sections.iter().any(|(inner, _)| {
                inner.id() != outer.id() && inner.ancestors().any(|n| n.id() == outer.id())
            })
        });
        Ok(innermost.map(|(_, found)| found.clone()).unwrap_or_default())
    }
}

/// Card scan: each `item` container yields one candidate from its first accepted link,
/// with fields read from the whole card (carousel slides, WordPress listing cards).
#[derive(Debug, Clone)]
pub struct ItemScan {
    name: String,
    item: Selector,
    link: Selector,
    filter: LinkFilter,
    fields: FieldRules,
}

impl ItemScan {
    pub fn new(
        name: impl Into<String>,
        item: &str,
        link: &str,
        filter: LinkFilter,
        fields: FieldRules,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            name: name.into(),
            item: parse_selector(item)?,
            link: parse_selector(link)?,
            filter,
            fields,
        })
    }
}

impl Strategy for ItemScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
        Ok(doc
            .select(&self.item)
            .filter_map(|item| {
                let href = item
                    .select(&self.link)
                    .filter_map(anchor_href)
                    .find(|h| self.filter.accepts(h))?;
                Some(self.fields.candidate(item, href))
            })
            .collect())
    }
}

const ISLAND_TITLE_KEYS: &[&str] = &["title", "name"];
const ISLAND_LINK_KEYS: &[&str] = &["url", "href", "link"];
const ISLAND_COVER_KEYS: &[&str] = &[
    "cover",
    "cover_url",
    "coverUrl",
    "thumbnail",
    "thumb",
    "image",
    "poster",
];
const ISLAND_STATUS_KEYS: &[&str] = &["status"];

/// Walks embedded JSON (Next.js data and flight rows) for objects that look like series:
/// a title or name plus a link or slug.
#[derive(Debug, Clone)]
pub struct DataIslandScan {
    name: String,
    filter: LinkFilter,
    /// Path a bare slug is appended to (e.g. `series/`).
    slug_prefix: String,
}

impl DataIslandScan {
    pub fn new(name: impl Into<String>, filter: LinkFilter, slug_prefix: &str) -> Self {
        Self {
            name: name.into(),
            filter,
            slug_prefix: slug_prefix.to_string(),
        }
    }

    fn candidate(&self, obj: &serde_json::Map<String, Value>) -> Option<Candidate> {
        let str_of = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(String::from)
        };
        let title = str_of(ISLAND_TITLE_KEYS)?;
        let link = str_of(ISLAND_LINK_KEYS).or_else(|| {
            str_of(&["slug"]).map(|slug| format!("{}{}", self.slug_prefix, slug))
        })?;
        if !self.filter.accepts(&link) {
            return None;
        }
        let mut candidate = Candidate::new(link).with_title(title);
        candidate.cover_url = str_of(ISLAND_COVER_KEYS);
        candidate.status = str_of(ISLAND_STATUS_KEYS);
        Some(candidate)
    }

    fn walk(&self, value: &Value, seen: &mut HashSet<String>, out: &mut Vec<Candidate>) {
        match value {
            Value::Object(obj) => {
                if let Some(c) = self.candidate(obj) {
                    if seen.insert(c.source_url.clone()) {
                        out.push(c);
                    }
                }
                for v in obj.values() {
                    self.walk(v, seen, out);
                }
            }
            Value::Array(items) => {
                for v in items {
                    self.walk(v, seen, out);
                }
            }
            _ => {}
        }
    }
}

impl Strategy for DataIslandScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<Candidate>, ParseError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for island in doc.data_islands()? {
            self.walk(&island, &mut seen, &mut out);
        }
        Ok(out)
    }
}
