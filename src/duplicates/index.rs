//! The published duplicate result set.
//!
//! A [`DuplicateIndex`] is rebuilt from scratch by every completed scan and
//! is immutable once published. Removals produce a new index from a clone of
//! the current one, so readers holding the old `Arc` never see a half-applied
//! change.
//!
//! Groups are partitioned: every member id maps to exactly one group, and a
//! group that drops below two members is deleted rather than kept degenerate.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use super::groups::{DuplicateGroup, GroupId, GroupMember, IdSequence, MemberId};
use crate::error::EngineError;
use crate::scanner::FileRecord;

/// Confirmed duplicate groups of one scan, keyed by group id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateIndex {
    groups: BTreeMap<GroupId, DuplicateGroup>,
    member_to_group: HashMap<MemberId, GroupId>,
}

/// A member resolved from its ids, not yet removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMember {
    /// Owning group
    pub group_id: GroupId,
    /// Member id
    pub member_id: MemberId,
    /// The member's record
    pub record: Arc<FileRecord>,
}

/// What a successful [`DuplicateIndex::remove_member`] changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedMember {
    /// Group the member was removed from
    pub group_id: GroupId,
    /// Removed member id
    pub member_id: MemberId,
    /// The removed record
    pub record: Arc<FileRecord>,
    /// Whether the group fell below two members and was deleted
    pub group_deleted: bool,
    /// Members of other groups dropped because they were inside the removed
    /// directory or were directories containing it
    pub pruned: Vec<MemberId>,
}

impl DuplicateIndex {
    /// Build an index from confirmed duplicate sets.
    ///
    /// Each set holds indices into `records` in discovery order. Group and
    /// member ids come from `ids`, so they never collide with ids handed out
    /// by an earlier scan.
    #[must_use]
    pub fn build(records: &[Arc<FileRecord>], sets: &[Vec<usize>], ids: &IdSequence) -> Self {
        let mut index = Self::default();

        for set in sets {
            let Some(&first) = set.first() else {
                continue;
            };
            if set.len() < 2 {
                continue;
            }
            let first = &records[first];
            let Some(full_hash) = first.full_hash else {
                continue;
            };

            let group_id = ids.next_id();
            let members: Vec<GroupMember> = set
                .iter()
                .map(|&idx| GroupMember {
                    id: ids.next_id(),
                    record: Arc::clone(&records[idx]),
                })
                .collect();
            for member in &members {
                index.member_to_group.insert(member.id, group_id);
            }
            index.groups.insert(
                group_id,
                DuplicateGroup {
                    id: group_id,
                    size: first.size,
                    is_directory: first.is_directory,
                    full_hash,
                    members,
                },
            );
        }

        index
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the index holds no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Look up a group.
    #[must_use]
    pub fn get(&self, id: GroupId) -> Option<&DuplicateGroup> {
        self.groups.get(&id)
    }

    /// Total bytes reclaimable by keeping one copy of every group.
    #[must_use]
    pub fn reclaimable(&self) -> u64 {
        self.groups.values().map(DuplicateGroup::reclaimable).sum()
    }

    /// Resolve a member reference.
    ///
    /// With `group_id` given, the member must belong to that group. Without
    /// it, the member id alone is enough (member ids are unique across
    /// groups).
    ///
    /// # Errors
    ///
    /// `InvalidId` if either id is unknown or they are not linked.
    pub fn resolve(
        &self,
        group_id: Option<GroupId>,
        member_id: MemberId,
    ) -> Result<ResolvedMember, EngineError> {
        let owner = self.member_to_group.get(&member_id).copied();
        let group_id = match (group_id, owner) {
            (Some(requested), Some(owner)) if requested == owner => owner,
            (None, Some(owner)) => owner,
            (Some(requested), _) => {
                return Err(EngineError::InvalidId(format!("{}/{}", requested, member_id)))
            }
            (None, None) => return Err(EngineError::InvalidId(member_id.to_string())),
        };

        self.groups
            .get(&group_id)
            .and_then(|group| group.member(member_id))
            .map(|member| ResolvedMember {
                group_id,
                member_id,
                record: Arc::clone(&member.record),
            })
            .ok_or_else(|| EngineError::InvalidId(format!("{}/{}", group_id, member_id)))
    }

    /// Remove a member, deleting its group if fewer than two remain.
    ///
    /// When the member is a directory, members of other groups that lived
    /// inside it are removed too, as are directory members that contained it
    /// (their content no longer matches). This only updates the index; the
    /// filesystem is never touched.
    ///
    /// # Errors
    ///
    /// `InvalidId` if the ids are unknown or not linked. The index is left
    /// unchanged in that case.
    pub fn remove_member(
        &mut self,
        group_id: GroupId,
        member_id: MemberId,
    ) -> Result<RemovedMember, EngineError> {
        let resolved = self.resolve(Some(group_id), member_id)?;
        let group_deleted = self.drop_member(group_id, member_id);

        let mut pruned = Vec::new();
        let removed_path = resolved.record.path.as_path();
        let affected: Vec<(GroupId, MemberId)> = self
            .groups
            .values()
            .flat_map(|group| {
                group
                    .members
                    .iter()
                    .filter(|m| {
                        let path = m.record.path.as_path();
                        (resolved.record.is_directory && path.starts_with(removed_path))
                            || (m.record.is_directory && removed_path.starts_with(path))
                    })
                    .map(move |m| (group.id, m.id))
            })
            .collect();
        for (gid, mid) in affected {
            // An earlier prune may already have deleted this group.
            if self.member_to_group.get(&mid) == Some(&gid) {
                self.drop_member(gid, mid);
                pruned.push(mid);
            }
        }
        if !pruned.is_empty() {
            log::debug!(
                "Removing {} also pruned {} members",
                removed_path.display(),
                pruned.len()
            );
        }

        Ok(RemovedMember {
            group_id,
            member_id,
            record: resolved.record,
            group_deleted,
            pruned,
        })
    }

    /// Unlink one member; returns whether its group was deleted.
    fn drop_member(&mut self, group_id: GroupId, member_id: MemberId) -> bool {
        self.member_to_group.remove(&member_id);
        let Some(group) = self.groups.get_mut(&group_id) else {
            return false;
        };
        group.members.retain(|m| m.id != member_id);
        if group.members.len() >= 2 {
            return false;
        }
        if let Some(group) = self.groups.remove(&group_id) {
            for member in &group.members {
                self.member_to_group.remove(&member.id);
            }
        }
        true
    }

    /// Lazy listing of groups whose size is at least `min_size`, largest
    /// first, ties broken by ascending group id.
    #[must_use]
    pub fn list(self: &Arc<Self>, min_size: u64) -> DuplicateListing {
        let mut order: Vec<(Reverse<u64>, GroupId)> = self
            .groups
            .values()
            .filter(|g| g.size >= min_size)
            .map(|g| (Reverse(g.size), g.id))
            .collect();
        order.sort_unstable();

        DuplicateListing {
            index: Arc::clone(self),
            order: order.into_iter().map(|(_, id)| id).collect(),
            position: 0,
        }
    }
}

/// Restartable iterator over a frozen [`DuplicateIndex`].
///
/// Holds its own `Arc` to the index it was created from, so paging never
/// needs a lock and is unaffected by later scans or removals.
#[derive(Debug, Clone)]
pub struct DuplicateListing {
    index: Arc<DuplicateIndex>,
    order: Vec<GroupId>,
    position: usize,
}

impl DuplicateListing {
    /// Total number of groups in the listing.
    #[must_use]
    pub fn total(&self) -> usize {
        self.order.len()
    }

    /// Start again from the first group.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// One zero-indexed page; out-of-range pages are empty.
    #[must_use]
    pub fn page(&self, page: usize, page_size: usize) -> Vec<DuplicateGroup> {
        let start = page.saturating_mul(page_size);
        self.order
            .iter()
            .skip(start)
            .take(page_size)
            .filter_map(|id| self.index.get(*id).cloned())
            .collect()
    }
}

impl Iterator for DuplicateListing {
    type Item = DuplicateGroup;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.order.get(self.position) {
            self.position += 1;
            if let Some(group) = self.index.get(*id) {
                return Some(group.clone());
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.order.len().saturating_sub(self.position);
        (0, Some(remaining))
    }
}
