//! nanocrud server library
//!
//! Named JSON collections served over HTTP, each backed by a datafile in a
//! git work tree:
//! - [`CollectionCache`] opens one store per collection name, lazily
//! - [`watcher`] stages datafile changes into the git index
//! - [`SnapshotCoordinator`] compacts, stages and commits on a trigger
//! - [`http`] exposes the collections

pub mod cache;
pub mod collection;
pub mod engine;
pub mod error;
pub mod http;
pub mod snapshot;
pub mod watcher;

pub use cache::CollectionCache;
pub use collection::Collection;
pub use engine::Engine;
pub use error::ServerError;
pub use snapshot::{
    CompactionFailure, LastSnapshot, SnapshotCoordinator, SnapshotError, SnapshotReport,
    SnapshotTrigger,
};
pub use watcher::WatchBackend;
