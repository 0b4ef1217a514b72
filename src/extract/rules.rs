//! Typed per-field rules. Each rule reads one optional string from a node; a field is an
//! ordered list of rules where the first success wins.

use crate::document::{
    collapse_whitespace, element_text, first_attr, first_line, parse_selector, parse_selectors,
    text_without,
};
use crate::model::{Candidate, DEFAULT_STATUS};
use crate::scraper::ParseError;
use scraper::{ElementRef, Selector};

/// Badge classes stripped before falling back to raw card text.
pub const CARD_NOISE: &[&str] = &[
    "span.status",
    ".status",
    ".type",
    ".px-1",
    ".absolute",
    ".hidden",
];

/// Type tags printed on cards that are never a title on their own.
pub const TYPE_TAGS: &[&str] = &["MANHWA", "MANHUA", "MANGA", "NOVEL", "COMIC"];

/// Image attributes in lookup order; lazy loaders park the real URL in the data-* ones.
pub const IMAGE_ATTRS: &[&str] = &["src", "data-src", "data-lazy-src", "data-cfsrc"];
const SRCSET_ATTRS: &[&str] = &["srcset", "data-srcset"];

/// One step of the title cascade.
#[derive(Debug, Clone)]
pub enum TitleRule {
    /// Text of the first matching descendant with usable text.
    Descendant(Selector),
    /// First line of the node's text after removing noise subtrees.
    WithoutNoise(Vec<Selector>),
    /// First line of the node's full text.
    FullText,
}

impl TitleRule {
    pub fn descendant(sel: &str) -> Result<Self, ParseError> {
        parse_selector(sel).map(TitleRule::Descendant)
    }

    pub fn without_noise(noise: &[&str]) -> Result<Self, ParseError> {
        parse_selectors(noise).map(TitleRule::WithoutNoise)
    }

    /// Apply to `el`. Values that are only a type tag count as absent.
    pub fn apply(&self, el: ElementRef<'_>, type_tags: &[String]) -> Option<String> {
        let usable = |s: String| -> Option<String> {
            let s = collapse_whitespace(&s);
            let is_tag = type_tags.iter().any(|t| t.eq_ignore_ascii_case(&s));
            (!s.is_empty() && !is_tag).then_some(s)
        };
        match self {
            TitleRule::Descendant(sel) => el.select(sel).find_map(|d| usable(element_text(d))),
            TitleRule::WithoutNoise(noise) => {
                let text = text_without(el, noise);
                first_line(&text).and_then(|l| usable(l.to_string()))
            }
            TitleRule::FullText => {
                let text = element_text(el);
                first_line(&text).and_then(|l| usable(l.to_string()))
            }
        }
    }
}

/// Cover lookup: the first matching image with a usable URL. Inline `data:` URIs are
/// lazy-load placeholders and are skipped.
#[derive(Debug, Clone)]
pub struct CoverRule {
    image: Selector,
    attrs: Vec<String>,
}

impl CoverRule {
    pub fn new(image: &str) -> Result<Self, ParseError> {
        Ok(Self {
            image: parse_selector(image)?,
            attrs: IMAGE_ATTRS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Replace the attribute lookup order (e.g. lazy attributes before `src`).
    pub fn with_attrs(mut self, attrs: &[&str]) -> Self {
        self.attrs = attrs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn apply(&self, el: ElementRef<'_>) -> Option<String> {
        if self.image.matches(&el) {
            if let Some(url) = self.read(el) {
                return Some(url);
            }
        }
        el.select(&self.image).find_map(|img| self.read(img))
    }

    fn read(&self, img: ElementRef<'_>) -> Option<String> {
        let direct = self
            .attrs
            .iter()
            .filter_map(|a| img.value().attr(a))
            .map(str::trim)
            .find(|v| is_usable_url(v));
        if let Some(url) = direct {
            return Some(url.to_string());
        }
        SRCSET_ATTRS
            .iter()
            .filter_map(|a| img.value().attr(a))
            .filter_map(first_srcset_url)
            .find(|v| is_usable_url(v))
            .map(String::from)
    }
}

fn is_usable_url(v: &str) -> bool {
    !v.is_empty() && !v.starts_with("data:")
}

/// First URL token of a `srcset` value (`"a.webp 1x, b.webp 2x"` gives `a.webp`).
pub fn first_srcset_url(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()
        .and_then(|entry| entry.split_whitespace().next())
}

/// Status badge text, falling back to a default.
#[derive(Debug, Clone)]
pub struct StatusRule {
    badge: Selector,
    default: Option<String>,
}

impl StatusRule {
    pub fn new(badge: &str, default: Option<&str>) -> Result<Self, ParseError> {
        Ok(Self {
            badge: parse_selector(badge)?,
            default: default.map(String::from),
        })
    }

    pub fn apply(&self, el: ElementRef<'_>) -> Option<String> {
        el.select(&self.badge)
            .map(|b| collapse_whitespace(&element_text(b)))
            .find(|s| !s.is_empty())
            .or_else(|| self.default.clone())
    }
}

/// The full set of field rules used to turn one card or anchor into a candidate.
#[derive(Debug, Clone)]
pub struct FieldRules {
    pub title: Vec<TitleRule>,
    pub cover: Option<CoverRule>,
    pub status: Option<StatusRule>,
    pub type_tags: Vec<String>,
}

impl FieldRules {
    /// Cascade for series cards: bold span, contrast span, heading, any bold node,
    /// text without badges, then raw text.
    pub fn card() -> Result<Self, ParseError> {
        Ok(Self {
            title: vec![
                TitleRule::descendant("span.font-bold")?,
                TitleRule::descendant("span.text-white")?,
                TitleRule::descendant("h1, h2, h3, h4, h5, h6")?,
                TitleRule::descendant(".font-bold")?,
                TitleRule::without_noise(CARD_NOISE)?,
                TitleRule::FullText,
            ],
            cover: Some(CoverRule::new("img")?),
            status: Some(StatusRule::new("span.status, .status", Some(DEFAULT_STATUS))?),
            type_tags: TYPE_TAGS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Rules with only the given title cascade; no cover or status.
    pub fn titles(title: Vec<TitleRule>) -> Self {
        Self {
            title,
            cover: None,
            status: None,
            type_tags: TYPE_TAGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_cover(mut self, cover: CoverRule) -> Self {
        self.cover = Some(cover);
        self
    }

    pub fn with_status(mut self, status: StatusRule) -> Self {
        self.status = Some(status);
        self
    }

    pub fn title_of(&self, el: ElementRef<'_>) -> Option<String> {
        self.title.iter().find_map(|r| r.apply(el, &self.type_tags))
    }

    /// Read every field from `el` into a candidate for `href`.
    pub fn candidate(&self, el: ElementRef<'_>, href: &str) -> Candidate {
        Candidate {
            source_url: href.to_string(),
            title: self.title_of(el),
            cover_url: self.cover.as_ref().and_then(|c| c.apply(el)),
            status: self.status.as_ref().and_then(|s| s.apply(el)),
        }
    }
}

/// Href of an anchor, trimmed; `None` for empty and fragment-only links.
pub fn anchor_href<'a>(a: ElementRef<'a>) -> Option<&'a str> {
    first_attr(a, &["href"]).filter(|h| !h.starts_with('#'))
}
