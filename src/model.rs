//! Canonical data model for discovery results.
//!
//! Candidates come out of extraction strategies unvalidated; records are what the
//! normalizer lets through. Payloads are what the aggregator hands to the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Title used for a record whose title has not been seen yet (cover-only markup).
pub const PLACEHOLDER_TITLE: &str = "Loading...";

/// Status reported when the markup carries no status badge.
pub const DEFAULT_STATUS: &str = "Ongoing";

/// Unvalidated output of one strategy pass over one DOM node.
///
/// `source_url` is the raw href as found in the markup; it may be relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub source_url: String,
    pub title: Option<String>,
    pub cover_url: Option<String>,
    pub status: Option<String>,
}

impl Candidate {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.cover_url = Some(cover.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// A normalized discovery record. `source_url` is absolute and identifies the record
/// within one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub title: String,
    pub source_url: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Position in a ranked listing: (page - 1) * page size + index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
}

impl Record {
    /// True when the title is still the placeholder and may be filled by a later pass.
    pub fn has_placeholder_title(&self) -> bool {
        self.title.is_empty() || self.title == PLACEHOLDER_TITLE
    }

    /// Turn the record back into a candidate (used to re-run normalization).
    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            source_url: self.source_url.clone(),
            title: if self.has_placeholder_title() {
                None
            } else {
                Some(self.title.clone())
            },
            cover_url: self.cover_url.clone(),
            status: self.status.clone(),
        }
    }
}

/// Named ordered sequence of records without duplicate source URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub records: Vec<Record>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of one discovery run: bucket name to records, plus the sync time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryPayload {
    pub synced_at: DateTime<Utc>,
    #[serde(flatten)]
    pub buckets: BTreeMap<String, Vec<Record>>,
}

impl DiscoveryPayload {
    pub fn new(synced_at: DateTime<Utc>) -> Self {
        Self {
            synced_at,
            buckets: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, bucket: Bucket) {
        self.buckets.insert(bucket.name, bucket.records);
    }

    /// Records of a bucket; an unknown bucket reads as empty.
    pub fn bucket(&self, name: &str) -> &[Record] {
        self.buckets.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_records(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}

/// One chapter entry of a series page, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLink {
    pub title: String,
    pub url: String,
}

/// Metadata and chapter list of a series detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesDetail {
    pub title: String,
    pub source_url: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub status: String,
    pub summary: Option<String>,
    pub chapters: Vec<ChapterLink>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn sample_record() -> Record {
        Record {
            title: "Solo Leveling".to_string(),
            source_url: "https://asuracomic.net/series/solo-leveling-a4b483cd".to_string(),
            cover_url: Some("https://gg.asuracomic.net/storage/media/1/cover.webp".to_string()),
            status: Some("Ongoing".to_string()),
            rank: None,
        }
    }

    #[test]
    fn payload_serializes_buckets_flat_with_camel_case_keys() -> Result<(), Box<dyn Error>> {
        let mut payload = DiscoveryPayload::new(Utc::now());
        let mut latest = Bucket::new("latest");
        latest.records.push(sample_record());
        payload.insert(latest);
        payload.insert(Bucket::new("trending"));

        let value = serde_json::to_value(&payload)?;
        let obj = value.as_object().ok_or("payload must be an object")?;
        assert!(obj.contains_key("syncedAt"));
        assert_eq!(obj["trending"].as_array().map(Vec::len), Some(0));
        let first = &obj["latest"][0];
        assert_eq!(first["title"].as_str(), Some("Solo Leveling"));
        assert!(first["sourceUrl"].as_str().is_some());
        assert!(first["coverUrl"].as_str().is_some());
        assert!(first.get("rank").is_none(), "unranked records omit rank");

        let back: DiscoveryPayload = serde_json::from_value(value)?;
        assert_eq!(back.bucket("latest").len(), 1);
        assert!(back.bucket("trending").is_empty());
        Ok(())
    }

    #[test]
    fn unknown_bucket_reads_empty() {
        let payload = DiscoveryPayload::new(Utc::now());
        assert!(payload.bucket("popular").is_empty());
        assert!(payload.is_empty());
    }

    #[test]
    fn placeholder_title_round_trips_as_missing_title() {
        let mut record = sample_record();
        record.title = PLACEHOLDER_TITLE.to_string();
        assert!(record.has_placeholder_title());
        assert_eq!(record.to_candidate().title, None);
        assert_eq!(
            sample_record().to_candidate().title.as_deref(),
            Some("Solo Leveling")
        );
    }
}
