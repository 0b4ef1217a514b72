//! Deduplication by source URL. Populated fields are first-seen-wins; empty and
//! placeholder fields are filled by whichever later record has them.

use crate::model::{Bucket, Record};
use std::collections::HashMap;

fn fill_gaps(existing: &mut Record, new: &Record) {
    if existing.has_placeholder_title() && !new.has_placeholder_title() {
        existing.title = new.title.clone();
    }
    if existing.cover_url.is_none() {
        existing.cover_url = new.cover_url.clone();
    }
    if existing.status.is_none() {
        existing.status = new.status.clone();
    }
}

/// Merge one record into `records`. Appends when the URL is new and returns true;
/// otherwise completes the existing record and returns false.
pub fn merge(records: &mut Vec<Record>, new: Record) -> bool {
    match records.iter_mut().find(|r| r.source_url == new.source_url) {
        Some(existing) => {
            fill_gaps(existing, &new);
            if existing.rank.is_none() {
                existing.rank = new.rank;
            }
            false
        }
        None => {
            records.push(new);
            true
        }
    }
}

/// Merge a batch in order.
pub fn merge_all(records: &mut Vec<Record>, new: impl IntoIterator<Item = Record>) {
    for record in new {
        merge(records, record);
    }
}

/// Share gap-filling across buckets: a URL seen in several buckets ends up with the
/// same title, cover, and status everywhere. Buckets are visited in slice order, so
/// the earliest populated value wins. Ranks stay per bucket.
pub fn reconcile(buckets: &mut [Bucket]) {
    let mut best: HashMap<String, Record> = HashMap::new();
    for record in buckets.iter().flat_map(|b| b.records.iter()) {
        match best.get_mut(&record.source_url) {
            Some(seen) => fill_gaps(seen, record),
            None => {
                best.insert(record.source_url.clone(), record.clone());
            }
        }
    }
    for record in buckets.iter_mut().flat_map(|b| b.records.iter_mut()) {
        if let Some(seen) = best.get(&record.source_url) {
            fill_gaps(record, seen);
        }
    }
}
