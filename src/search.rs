//! Tag search over scanned records.
//!
//! The search index is independent of duplicate grouping: every record of a
//! completed scan is searchable, including the sole survivor of a collapsed
//! group. Queries are normalized the same way tags are (trimmed, NFC,
//! lower-cased), capped to [`MAX_QUERY_TAGS`] terms, and paginated with a
//! zero-indexed page number.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scanner::{normalize_tag, FileRecord};

/// Only the first eight query tags are used; the rest are ignored.
pub const MAX_QUERY_TAGS: usize = 8;

/// How multiple query tags combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// A record matches if it carries at least one query tag.
    #[default]
    Any,
    /// A record matches only if it carries every query tag.
    All,
}

/// Inverted index from tag to records, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    records: Vec<Arc<FileRecord>>,
    by_tag: BTreeMap<String, Vec<usize>>,
}

impl SearchIndex {
    /// Index every record by its tags.
    #[must_use]
    pub fn build(records: Vec<Arc<FileRecord>>) -> Self {
        let mut by_tag: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            for tag in &record.tags {
                by_tag.entry(tag.clone()).or_default().push(idx);
            }
        }
        Self { records, by_tag }
    }

    /// Number of searchable records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is searchable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All searchable records in discovery order.
    #[must_use]
    pub fn records(&self) -> &[Arc<FileRecord>] {
        &self.records
    }

    /// Search by tags.
    ///
    /// An empty query (after normalization) and an out-of-range page both
    /// return an empty result, never an error.
    #[must_use]
    pub fn search<S: AsRef<str>>(
        &self,
        tags: &[S],
        page: usize,
        page_size: usize,
        mode: TagMatch,
    ) -> Vec<Arc<FileRecord>> {
        let query: BTreeSet<String> = tags
            .iter()
            .take(MAX_QUERY_TAGS)
            .map(|t| normalize_tag(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        if query.is_empty() || page_size == 0 {
            return Vec::new();
        }

        let hits: BTreeSet<usize> = match mode {
            TagMatch::Any => query
                .iter()
                .filter_map(|t| self.by_tag.get(t))
                .flatten()
                .copied()
                .collect(),
            TagMatch::All => {
                let mut postings = query.iter().map(|t| self.by_tag.get(t));
                let Some(Some(first)) = postings.next() else {
                    return Vec::new();
                };
                let mut hits: BTreeSet<usize> = first.iter().copied().collect();
                for posting in postings {
                    let Some(posting) = posting else {
                        return Vec::new();
                    };
                    hits.retain(|idx| posting.binary_search(idx).is_ok());
                }
                hits
            }
        };

        hits.into_iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .map(|idx| Arc::clone(&self.records[idx]))
            .collect()
    }

    /// A copy of this index without the given paths or anything below them.
    #[must_use]
    pub fn without_paths(&self, removed: &[PathBuf]) -> Self {
        let kept = self
            .records
            .iter()
            .filter(|r| !removed.iter().any(|p| r.path.starts_with(p)))
            .cloned()
            .collect();
        Self::build(kept)
    }
}

/// Split a raw query on commas and whitespace, dropping empty terms.
#[must_use]
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
