//! Parsed documents: an HTML tree with its base URL, embedded JSON islands, and the
//! text helpers extraction rules are built from.
//!
//! [RawDocument] wraps [scraper::Html], which is not `Send`. Parse and extract in one
//! synchronous step; never keep a document alive across an `.await`.

use crate::scraper::ParseError;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;

/// Parse a CSS selector or return a parse error (avoids panics from Selector::parse).
pub fn parse_selector(sel: &str) -> Result<Selector, ParseError> {
    Selector::parse(sel).map_err(|e| ParseError::Selector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

/// Parse every selector of a list, failing on the first invalid one.
pub fn parse_selectors(sels: &[&str]) -> Result<Vec<Selector>, ParseError> {
    sels.iter().map(|s| parse_selector(s)).collect()
}

/// Parse a plain JSON body.
pub fn parse_json(raw: &str) -> Result<Value, ParseError> {
    serde_json::from_str(raw).map_err(|e| ParseError::DataIsland {
        reason: e.to_string(),
    })
}

/// A parsed page and the URL relative links on it resolve against.
pub struct RawDocument {
    html: Html,
    base: Url,
    raw: String,
}

impl std::fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDocument")
            .field("base", &self.base.as_str())
            .field("bytes", &self.raw.len())
            .finish()
    }
}

impl RawDocument {
    /// Parse raw HTML. Blank input or an unusable base URL is malformed.
    pub fn parse(raw: &str, base_url: &str) -> Result<Self, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::malformed("document is empty"));
        }
        let base = Url::parse(base_url)
            .map_err(|e| ParseError::malformed(format!("base URL {:?}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ParseError::malformed(format!(
                "base URL {:?} cannot resolve relative links",
                base_url
            )));
        }
        Ok(Self {
            html: Html::parse_document(raw),
            base,
            raw: raw.to_string(),
        })
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Scheme, host and port of the base URL, without a trailing slash.
    pub fn origin(&self) -> String {
        self.base.origin().ascii_serialization()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The body read as JSON, for API responses.
    pub fn json(&self) -> Result<Value, ParseError> {
        parse_json(&self.raw)
    }

    /// Every element matching `selector`, in document order.
    pub fn select<'a>(&'a self, selector: &'a Selector) -> impl Iterator<Item = ElementRef<'a>> {
        self.html.select(selector)
    }

    /// JSON of a `<script id="__NEXT_DATA__">` block, if the page has one.
    pub fn next_data(&self) -> Result<Option<Value>, ParseError> {
        let sel = parse_selector("script#__NEXT_DATA__")?;
        match self.html.select(&sel).next() {
            Some(script) => {
                let text: String = script.text().collect();
                parse_json(text.trim()).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Unescaped string payloads of `self.__next_f.push([1,"..."])` flight chunks.
    pub fn flight_chunks(&self) -> Result<Vec<String>, ParseError> {
        let re = Regex::new(r#"self\.__next_f\.push\(\[1,"((?:[^"\\]|\\.)*)"\]\)"#).map_err(
            |e| ParseError::DataIsland {
                reason: e.to_string(),
            },
        )?;
        re.captures_iter(&self.raw)
            .map(|cap| unescape_js_string(&cap[1]))
            .collect()
    }

    /// All JSON values embedded in the page: the Next.js data block first, then each
    /// JSON row of the flight stream. Rows that are not JSON are skipped.
    pub fn data_islands(&self) -> Result<Vec<Value>, ParseError> {
        let mut values = Vec::new();
        if let Some(v) = self.next_data()? {
            values.push(v);
        }
        for chunk in self.flight_chunks()? {
            for line in chunk.lines() {
                // Flight rows look like `1a:[...]` or `5:{...}`.
                let payload = match line.split_once(':') {
                    Some((id, rest)) if id.chars().all(|c| c.is_ascii_alphanumeric()) => rest,
                    _ => line,
                };
                let payload = payload.trim();
                if !(payload.starts_with('{') || payload.starts_with('[')) {
                    continue;
                }
                if let Ok(v) = serde_json::from_str::<Value>(payload) {
                    values.push(v);
                }
            }
        }
        Ok(values)
    }
}

/// Decode a JavaScript double-quoted string body (without the quotes).
pub fn unescape_js_string(body: &str) -> Result<String, ParseError> {
    serde_json::from_str::<String>(&format!("\"{}\"", body)).map_err(|e| {
        ParseError::DataIsland {
            reason: format!("could not unescape embedded string: {}", e),
        }
    })
}

const BLOCK_TAGS: &[&str] = &[
    "br", "div", "p", "li", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article", "header",
    "footer", "ul", "ol", "tr",
];

/// Text of an element with block boundaries turned into line breaks.
pub fn element_text(el: ElementRef<'_>) -> String {
    text_without(el, &[])
}

/// Text of an element, skipping every descendant subtree that matches a noise selector.
/// Equivalent to cloning the subtree, removing the noise, and reading the text.
pub fn text_without(el: ElementRef<'_>, noise: &[Selector]) -> String {
    let mut out = String::new();
    collect_text(el, noise, &mut out);
    out
}

fn collect_text(el: ElementRef<'_>, noise: &[Selector], out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if noise.iter().any(|s| s.matches(&child_el)) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&child_el.value().name());
                if block {
                    out.push('\n');
                }
                collect_text(child_el, noise, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// First line of `text` that has non-whitespace content, trimmed.
pub fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

/// Whitespace runs collapsed to single spaces, trimmed.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapsed text of the first element, trying selectors in order, whose text is non-empty.
pub fn first_text(doc: &RawDocument, sels: &[&str]) -> Result<Option<String>, ParseError> {
    for sel in parse_selectors(sels)? {
        let found = doc
            .select(&sel)
            .map(|el| collapse_whitespace(&element_text(el)))
            .find(|t| !t.is_empty());
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// First non-empty value among `attrs`, in order.
pub fn first_attr<'a>(el: ElementRef<'a>, attrs: &[&str]) -> Option<&'a str> {
    attrs
        .iter()
        .filter_map(|a| el.value().attr(a))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_blank_and_bad_base() {
        assert!(matches!(
            RawDocument::parse("   \n", "https://example.com"),
            Err(ParseError::Malformed { .. })
        ));
        assert!(matches!(
            RawDocument::parse("<p>x</p>", "not a url"),
            Err(ParseError::Malformed { .. })
        ));
        assert!(matches!(
            RawDocument::parse("<p>x</p>", "mailto:someone@example.com"),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn origin_drops_path() -> Result<(), ParseError> {
        let doc = RawDocument::parse("<p>x</p>", "https://asuracomic.net/series?page=2")?;
        assert_eq!(doc.origin(), "https://asuracomic.net");
        Ok(())
    }

    #[test]
    fn invalid_selector_is_an_error_not_a_panic() {
        assert!(matches!(
            parse_selector("div[["),
            Err(ParseError::Selector { .. })
        ));
    }

    #[test]
    fn text_without_skips_noise_subtrees() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            concat!(
                r#"<a id="card"><span class="status">Ongoing</span>"#,
                r#"<div>Omniscient Reader<span class="type">MANHWA</span></div>"#,
                r#"<div>Chapter 200</div></a>"#
            ),
            "https://example.com",
        )?;
        let sel = parse_selector("a#card")?;
        let el = doc.select(&sel).next().ok_or(ParseError::malformed("no card"))?;
        let noise = parse_selectors(&[".status", ".type"])?;
        let text = text_without(el, &noise);
        assert_eq!(first_line(&text), Some("Omniscient Reader"));
        assert!(!text.contains("MANHWA"));
        assert!(element_text(el).contains("Ongoing"));
        Ok(())
    }

    #[test]
    fn next_data_block_is_parsed() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            r#"<html><body><script id="__NEXT_DATA__" type="application/json">
                {"props":{"pageProps":{"series":[{"name":"A"}]}}}
            </script></body></html>"#,
            "https://example.com",
        )?;
        let data = doc.next_data()?.ok_or(ParseError::malformed("missing"))?;
        assert_eq!(data["props"]["pageProps"]["series"][0]["name"], "A");
        Ok(())
    }

    #[test]
    fn broken_next_data_is_a_data_island_error() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            r#"<script id="__NEXT_DATA__">{"props":</script>"#,
            "https://example.com",
        )?;
        assert!(matches!(doc.next_data(), Err(ParseError::DataIsland { .. })));
        Ok(())
    }

    #[test]
    fn flight_chunks_are_unescaped_and_rows_parsed() -> Result<(), ParseError> {
        let raw = concat!(
            r#"<html><script>self.__next_f.push([1,"#,
            r#""5:{\"name\":\"Solo Leveling\",\"slug\":\"solo-leveling-a4b483cd\"}"#,
            r#"\n6:\"$Sreact.suspense\"\n"])</script><p>x</p></html>"#
        );
        let doc = RawDocument::parse(raw, "https://asuracomic.net")?;
        let chunks = doc.flight_chunks()?;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("5:{\"name\""));
        let islands = doc.data_islands()?;
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0]["slug"], "solo-leveling-a4b483cd");
        Ok(())
    }

    #[test]
    fn first_attr_skips_blank_values() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            r#"<img src="" data-src=" https://cdn.example.com/a.webp ">"#,
            "https://example.com",
        )?;
        let sel = parse_selector("img")?;
        let img = doc.select(&sel).next().ok_or(ParseError::malformed("no img"))?;
        assert_eq!(
            first_attr(img, &["src", "data-src"]),
            Some("https://cdn.example.com/a.webp")
        );
        Ok(())
    }

    #[test]
    fn first_text_tries_selectors_in_order() -> Result<(), ParseError> {
        let doc = RawDocument::parse(
            "<h1 class='entry-title'>  </h1><div class='post-title'><h1>Real\n Title</h1></div>",
            "https://example.com",
        )?;
        assert_eq!(
            first_text(&doc, &["h1.entry-title", ".post-title h1"])?.as_deref(),
            Some("Real Title")
        );
        assert_eq!(first_text(&doc, &["h2"])?, None);
        Ok(())
    }

    #[test]
    fn collapse_whitespace_joins_lines() {
        assert_eq!(collapse_whitespace("  Solo\n\t Leveling  "), "Solo Leveling");
    }
}
