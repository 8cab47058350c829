//! The version-control seam consumed by the server
//!
//! Calls are blocking; async callers run them on the blocking thread pool.

use std::sync::{Arc, Mutex, MutexGuard};

use libnanocrud_core::Author;

use crate::repository::{CommitOutcome, DataRepository};
use crate::GitError;

/// Staging and committing against a repository
pub trait VersionControl: Send + Sync + 'static {
    /// Stage the current content of a work-tree-relative path
    fn add(&self, path: &str) -> Result<(), GitError>;

    /// Commit everything staged; a no-op when nothing changed
    fn commit(&self, message: &str) -> Result<CommitOutcome, GitError>;
}

/// A repository shared across tasks, serialized by a mutex, with a fixed author
#[derive(Clone)]
pub struct SharedRepository {
    repo: Arc<Mutex<DataRepository>>,
    author: Author,
}

impl std::fmt::Debug for SharedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRepository")
            .field("author", &self.author)
            .finish()
    }
}

impl SharedRepository {
    pub fn new(repo: DataRepository, author: Author) -> Self {
        Self {
            repo: Arc::new(Mutex::new(repo)),
            author,
        }
    }

    /// Lock the repository for direct use
    pub fn lock(&self) -> Result<MutexGuard<'_, DataRepository>, GitError> {
        self.repo.lock().map_err(|_| GitError::Poisoned)
    }

    pub fn author(&self) -> &Author {
        &self.author
    }
}

impl VersionControl for SharedRepository {
    fn add(&self, path: &str) -> Result<(), GitError> {
        self.lock()?.add(path)
    }

    fn commit(&self, message: &str) -> Result<CommitOutcome, GitError> {
        self.lock()?.commit(message, &self.author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shared_repository_commits_with_author() {
        let temp = TempDir::new().unwrap();
        let (repo, _) = DataRepository::init_or_open(temp.path()).unwrap();
        let author = Author {
            name: "Ops".to_string(),
            email: "ops@example.com".to_string(),
        };
        let shared = SharedRepository::new(repo, author);

        std::fs::write(temp.path().join("c"), "x\n").unwrap();
        let vcs: &dyn VersionControl = &shared;
        vcs.add("c").unwrap();
        assert!(vcs.commit("snap").unwrap().is_created());

        let log = shared.lock().unwrap().log(1).unwrap();
        assert_eq!(log[0].author_name, "Ops");
    }
}
