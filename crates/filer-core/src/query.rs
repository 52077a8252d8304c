//! Filtering, ordering and aggregation shared by all store backends.
//!
//! SQL backends push these down into queries; the in-memory store applies
//! them directly. Both must agree on the semantics defined here.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::ContentRecord;

/// How many tags [`StoreStats::top_tags`] keeps.
pub const TOP_TAGS: usize = 20;

/// Record filter for search. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Case-insensitive substring of any tag.
    pub tag: Option<String>,
    /// Exact source of any provenance entry.
    pub source: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &ContentRecord) -> bool {
        let tag_ok = match &self.tag {
            Some(needle) => {
                let needle = needle.to_ascii_lowercase();
                record
                    .tags
                    .iter()
                    .any(|t| t.to_ascii_lowercase().contains(&needle))
            }
            None => true,
        };
        let source_ok = match &self.source {
            Some(source) => record.locations.iter().any(|p| &p.source == source),
            None => true,
        };
        tag_ok && source_ok
    }
}

/// Listing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    /// Oldest import first, ties broken by digest.
    #[default]
    Imported,
    /// Largest first, ties broken by digest.
    Size,
}

impl std::str::FromStr for ListOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imported" => Ok(ListOrder::Imported),
            "size" => Ok(ListOrder::Size),
            other => anyhow::bail!("unknown sort order '{}': use imported or size", other),
        }
    }
}

pub fn sort_records(records: &mut [ContentRecord], order: ListOrder) {
    match order {
        ListOrder::Imported => {
            records.sort_by(|a, b| (a.imported_at, &a.digest).cmp(&(b.imported_at, &b.digest)))
        }
        ListOrder::Size => {
            records.sort_by(|a, b| (Reverse(a.size), &a.digest).cmp(&(Reverse(b.size), &b.digest)))
        }
    }
}

/// Aggregate statistics over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub unique_count: u64,
    pub total_size: u64,
    pub total_locations: u64,
    /// Provenance entries per source.
    pub by_source: BTreeMap<String, u64>,
    /// Most common tags, by record count, descending.
    pub top_tags: Vec<(String, u64)>,
}

/// Compute [`StoreStats`] by scanning records.
pub fn aggregate<'a>(records: impl IntoIterator<Item = &'a ContentRecord>) -> StoreStats {
    let mut stats = StoreStats::default();
    let mut tag_counts: BTreeMap<String, u64> = BTreeMap::new();

    for record in records {
        stats.unique_count += 1;
        stats.total_size += record.size;
        stats.total_locations += record.locations.len() as u64;
        for p in &record.locations {
            *stats.by_source.entry(p.source.clone()).or_default() += 1;
        }
        for tag in &record.tags {
            *tag_counts.entry(tag.clone()).or_default() += 1;
        }
    }

    stats.top_tags = rank_tags(tag_counts);
    stats
}

/// Order tag counts descending (ties alphabetical) and keep [`TOP_TAGS`].
pub fn rank_tags(counts: BTreeMap<String, u64>) -> Vec<(String, u64)> {
    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_TAGS);
    ranked
}
