//! Git-backed versioning for nanocrud
//!
//! The data directory is the work tree of a git repository. This crate
//! provides:
//! - Idempotent repository bootstrap and an exclusive process lock
//! - Staging of collection datafiles into the index
//! - Commits that are skipped when the index matches `HEAD`
//! - History inspection (log, changed paths, file contents at a commit)

mod error;
mod repository;
mod vcs;

pub use error::GitError;
pub use git2::Oid;
pub use repository::{CommitInfo, CommitOutcome, DataRepository, LockedRepository, LOCK_FILE};
pub use vcs::{SharedRepository, VersionControl};
