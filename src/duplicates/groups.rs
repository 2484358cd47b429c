//! Bucket structures between pipeline stages and confirmed duplicate groups.
//!
//! # Overview
//!
//! The detection pipeline moves records through two explicit bucket maps:
//!
//! 1. [`QuickKey`] buckets: `(kind, size, quick hash)`. A singleton bucket
//!    cannot hold a duplicate and is discarded before any full read.
//! 2. [`FullKey`] buckets: `(kind, size, full hash)`. Every bucket with two
//!    or more members becomes a [`DuplicateGroup`].
//!
//! Buckets hold indices into the scan's record list, kept in discovery
//! order, so the first member of a group is always the first one found.
//!
//! # Example
//!
//! ```
//! use storamen::duplicates::{bucket_records, QuickKey};
//!
//! let keys = vec![
//!     (0, QuickKey { is_directory: false, size: 10, quick_hash: [1; 32] }),
//!     (1, QuickKey { is_directory: false, size: 10, quick_hash: [1; 32] }),
//!     (2, QuickKey { is_directory: false, size: 10, quick_hash: [2; 32] }),
//! ];
//!
//! let (buckets, stats) = bucket_records(keys);
//! assert_eq!(buckets.len(), 1);
//! assert_eq!(stats.eliminated_unique, 1);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scanner::{hash_to_hex, FileRecord, Hash};

/// Identifier of a duplicate group.
pub type GroupId = u64;

/// Identifier of one member of a duplicate group.
pub type MemberId = u64;

/// Stage-two bucket key: candidates that may share content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuickKey {
    /// Directories are never bucketed with files
    pub is_directory: bool,
    /// Size in bytes
    pub size: u64,
    /// Quick (sampled) fingerprint
    pub quick_hash: Hash,
}

/// Stage-four bucket key: confirmed identical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FullKey {
    /// Directories are never bucketed with files
    pub is_directory: bool,
    /// Size in bytes
    pub size: u64,
    /// Complete content digest
    pub full_hash: Hash,
}

/// Statistics about a bucketing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Number of records bucketed
    pub total_records: usize,
    /// Number of distinct keys
    pub unique_keys: usize,
    /// Records that share a bucket with at least one other record
    pub potential_duplicates: usize,
    /// Records eliminated as unique (singleton buckets)
    pub eliminated_unique: usize,
    /// Buckets with 2+ records
    pub duplicate_buckets: usize,
}

impl GroupingStats {
    /// Percentage of records eliminated by this pass.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            (self.eliminated_unique as f64 / self.total_records as f64) * 100.0
        }
    }
}

/// Bucket record indices by key, discarding singleton buckets.
///
/// Indices keep their input order inside each bucket, and buckets iterate
/// in key order, so the result is deterministic for a given input.
#[must_use]
pub fn bucket_records<K: Ord>(
    keyed: impl IntoIterator<Item = (usize, K)>,
) -> (BTreeMap<K, Vec<usize>>, GroupingStats) {
    let mut all: BTreeMap<K, Vec<usize>> = BTreeMap::new();
    let mut stats = GroupingStats::default();

    for (idx, key) in keyed {
        stats.total_records += 1;
        all.entry(key).or_default().push(idx);
    }
    stats.unique_keys = all.len();

    all.retain(|_, members| {
        if members.len() < 2 {
            stats.eliminated_unique += members.len();
            false
        } else {
            stats.potential_duplicates += members.len();
            stats.duplicate_buckets += 1;
            true
        }
    });

    (all, stats)
}

/// Process-wide allocator for group and member ids.
///
/// Ids are never reused, so an id from an older scan can never resolve to a
/// record of a newer one.
#[derive(Debug, Clone)]
pub struct IdSequence {
    next: Arc<AtomicU64>,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSequence {
    /// Create a sequence starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// One member of a duplicate group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    /// Member id, unique across all groups
    pub id: MemberId,
    /// The shared record
    pub record: Arc<FileRecord>,
}

/// Confirmed duplicate group: two or more records with identical content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Stable group id (survives partial removals)
    pub id: GroupId,
    /// Size in bytes of every member
    pub size: u64,
    /// Whether the members are directories
    pub is_directory: bool,
    /// Shared full content digest
    #[serde(with = "hex_hash")]
    pub full_hash: Hash,
    /// Members in discovery order
    pub members: Vec<GroupMember>,
}

impl DuplicateGroup {
    /// Number of members in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// First-discovered member, the natural keep candidate.
    ///
    /// Nothing is ever deleted automatically; this is only a hint for
    /// listings.
    #[must_use]
    pub fn canonical(&self) -> Option<&GroupMember> {
        self.members.first()
    }

    /// Bytes reclaimable by keeping a single copy.
    #[must_use]
    pub fn reclaimable(&self) -> u64 {
        self.size * (self.members.len().saturating_sub(1) as u64)
    }

    /// Hex representation of the content digest.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hash_to_hex(&self.full_hash)
    }

    /// Find a member by id.
    #[must_use]
    pub fn member(&self, id: MemberId) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.id == id)
    }
}

mod hex_hash {
    use crate::scanner::{hash_to_hex, hex_to_hash, Hash};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hash_to_hex(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash, D::Error> {
        let raw = String::deserialize(d)?;
        hex_to_hash(&raw).ok_or_else(|| serde::de::Error::custom("invalid hash hex"))
    }
}
