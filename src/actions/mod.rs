//! Actions on scan results.
//!
//! - [`delete`]: the filesystem layer that physically removes a resolved path
//!   (permanent, trash, or dry run)
//! - [`removal`]: the coordinator that validates member ids, calls the
//!   deleter, and only then updates the duplicate index
//!
//! ```no_run
//! use storamen::actions::{parse_ids, DeleteMode, FsDeleter, RemovalCoordinator};
//!
//! let deleter = FsDeleter::new(DeleteMode::Trash);
//! let coordinator = RemovalCoordinator::new(&deleter);
//! let ids = parse_ids("12, 7/15");
//! # let _ = (coordinator, ids);
//! ```

pub mod delete;
pub mod removal;

pub use delete::{
    delete_to_trash, permanent_delete, DeleteError, DeleteMode, DeleteResult, Deleter, FsDeleter,
};
pub use removal::{
    parse_ids, BatchRemoval, MemberRef, PendingRemoval, RemovalCoordinator, RemovalIndex,
    RemovalOutcome, RemovalState,
};
