//! Removal of individual duplicate-group members.
//!
//! Every request walks the same state machine:
//!
//! ```text
//! Requested -> Validated -> PhysicallyDeleted -> IndexUpdated
//!          \-> Invalid              (unknown id, nothing touched)
//!              Validated -> DeleteFailed   (index untouched, file intact)
//! ```
//!
//! The index is only updated after the [`Deleter`] reports success, so a
//! failed deletion never leaves the index claiming a file is gone. Batches
//! process every id independently and never stop on a failure.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use super::delete::Deleter;
use crate::duplicates::{GroupId, MemberId, RemovedMember};
use crate::error::EngineError;

/// Reference to a member, with or without its group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum MemberRef {
    /// `group/member`
    Member {
        /// Owning group
        group: GroupId,
        /// Member in that group
        member: MemberId,
    },
    /// A bare member id; member ids are unique across groups
    Legacy(MemberId),
}

impl MemberRef {
    /// Group id, when given.
    #[must_use]
    pub fn group(self) -> Option<GroupId> {
        match self {
            Self::Member { group, .. } => Some(group),
            Self::Legacy(_) => None,
        }
    }

    /// Member id.
    #[must_use]
    pub fn member(self) -> MemberId {
        match self {
            Self::Member { member, .. } | Self::Legacy(member) => member,
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member { group, member } => write!(f, "{}/{}", group, member),
            Self::Legacy(member) => write!(f, "{}", member),
        }
    }
}

impl FromStr for MemberRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidId(s.to_string());
        let s = s.trim();
        match s.split_once('/') {
            Some((group, member)) => Ok(Self::Member {
                group: group.trim().parse().map_err(|_| invalid())?,
                member: member.trim().parse().map_err(|_| invalid())?,
            }),
            None => s.parse().map(Self::Legacy).map_err(|_| invalid()),
        }
    }
}

/// Split a raw id list on commas and whitespace.
///
/// Tokens are returned unparsed so malformed ids can be reported as failed.
#[must_use]
pub fn parse_ids(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Where a removal request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalState {
    /// Received, not yet checked
    Requested,
    /// Ids resolved to a path
    Validated,
    /// The deleter removed the path
    PhysicallyDeleted,
    /// The index dropped the member (terminal success)
    IndexUpdated,
    /// Unknown or unlinked id (terminal failure, no side effects)
    Invalid,
    /// Deletion failed (terminal failure, index untouched)
    DeleteFailed,
}

/// A validated removal waiting for physical deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRemoval {
    /// Owning group
    pub group_id: GroupId,
    /// Member to remove
    pub member_id: MemberId,
    /// Path relative to the scan root
    pub path: PathBuf,
    /// Resolved filesystem path
    pub absolute_path: PathBuf,
    /// Whether the member is a directory
    pub is_directory: bool,
}

/// Index operations the coordinator needs.
pub trait RemovalIndex {
    /// Resolve a reference to a path without changing anything.
    ///
    /// # Errors
    ///
    /// `InvalidId` for unknown or unlinked ids.
    fn resolve(&self, target: MemberRef) -> Result<PendingRemoval, EngineError>;

    /// Drop a member whose path has been physically deleted.
    ///
    /// # Errors
    ///
    /// `InvalidId` if the member is no longer in the index.
    fn confirm(&mut self, pending: &PendingRemoval) -> Result<RemovedMember, EngineError>;
}

/// Per-id result inside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct RemovalOutcome {
    /// The id as requested
    pub target: String,
    /// Terminal state
    pub state: RemovalState,
    /// Resolved path, once validated
    pub path: Option<PathBuf>,
    /// Failure message for terminal failures
    pub error: Option<String>,
}

/// Result of a batch removal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchRemoval {
    /// Ids removed from disk and index
    pub succeeded: Vec<String>,
    /// Ids that were invalid or could not be deleted
    pub failed: Vec<String>,
    /// Detailed outcome for every id, in request order
    pub outcomes: Vec<RemovalOutcome>,
}

/// Drives removals through validation, deletion and index update.
pub struct RemovalCoordinator<'a> {
    deleter: &'a dyn Deleter,
}

impl<'a> RemovalCoordinator<'a> {
    /// Create a coordinator deleting through `deleter`.
    #[must_use]
    pub fn new(deleter: &'a dyn Deleter) -> Self {
        Self { deleter }
    }

    /// Remove one member.
    ///
    /// # Errors
    ///
    /// `InvalidId` if the reference does not resolve, `DeleteFailed` if the
    /// deleter fails. In both cases the index is unchanged.
    pub fn remove_one<I: RemovalIndex + ?Sized>(
        &self,
        index: &mut I,
        target: MemberRef,
    ) -> Result<RemovedMember, EngineError> {
        let (_, error, removed) = self.run(index, target);
        if let Some(e) = error {
            return Err(e);
        }
        removed.ok_or_else(|| EngineError::InvalidId(target.to_string()))
    }

    /// Remove every id of a raw list, independently.
    pub fn remove_batch<I: RemovalIndex + ?Sized, S: AsRef<str>>(
        &self,
        index: &mut I,
        ids: &[S],
    ) -> BatchRemoval {
        let mut batch = BatchRemoval::default();

        for raw in ids {
            let raw = raw.as_ref().trim().to_string();
            let (outcome, error, _) = match raw.parse::<MemberRef>() {
                Ok(target) => self.run(index, target),
                Err(e) => (
                    RemovalOutcome {
                        target: raw.clone(),
                        state: RemovalState::Invalid,
                        path: None,
                        error: None,
                    },
                    Some(e),
                    None,
                ),
            };

            let outcome = RemovalOutcome {
                target: raw.clone(),
                error: error.map(|e| e.to_string()),
                ..outcome
            };
            if outcome.state == RemovalState::IndexUpdated {
                batch.succeeded.push(raw);
            } else {
                batch.failed.push(raw);
            }
            batch.outcomes.push(outcome);
        }

        log::info!(
            "Batch removal: {} succeeded, {} failed",
            batch.succeeded.len(),
            batch.failed.len()
        );
        batch
    }

    fn run<I: RemovalIndex + ?Sized>(
        &self,
        index: &mut I,
        target: MemberRef,
    ) -> (RemovalOutcome, Option<EngineError>, Option<RemovedMember>) {
        let mut outcome = RemovalOutcome {
            target: target.to_string(),
            state: RemovalState::Requested,
            path: None,
            error: None,
        };

        let pending = match index.resolve(target) {
            Ok(pending) => pending,
            Err(e) => {
                log::debug!("Removal {}: invalid id", target);
                outcome.state = RemovalState::Invalid;
                return (outcome, Some(e), None);
            }
        };
        outcome.state = RemovalState::Validated;
        outcome.path = Some(pending.absolute_path.clone());

        if let Err(e) = self.deleter.delete(&pending.absolute_path) {
            log::warn!("Removal {}: {}", target, e);
            outcome.state = RemovalState::DeleteFailed;
            return (outcome, Some(e.into()), None);
        }
        outcome.state = RemovalState::PhysicallyDeleted;

        match index.confirm(&pending) {
            Ok(removed) => {
                outcome.state = RemovalState::IndexUpdated;
                log::info!("Removed {} ({})", target, pending.path.display());
                (outcome, None, Some(removed))
            }
            Err(e) => {
                log::error!(
                    "Removal {}: deleted {} but the index no longer holds it",
                    target,
                    pending.absolute_path.display()
                );
                (outcome, Some(e), None)
            }
        }
    }
}
