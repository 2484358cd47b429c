//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Quick-hash bucketing of eligible records (sampled content, subtree shape)
//! - Full-hash confirmation inside colliding buckets
//! - The published, queryable duplicate index

pub mod finder;
pub mod groups;
pub mod index;

pub use finder::{DuplicateFinder, FinderConfig, PipelineOutput, PipelineStats, SubtreeIndex};
pub use groups::{
    bucket_records, DuplicateGroup, FullKey, GroupId, GroupMember, GroupingStats, IdSequence,
    MemberId, QuickKey,
};
pub use index::{DuplicateIndex, DuplicateListing, RemovedMember, ResolvedMember};
