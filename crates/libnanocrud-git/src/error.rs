use thiserror::Error;

/// Errors that can occur during Git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a git work tree: {0}")]
    NotARepo(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Repository busy: {0}")]
    Busy(String),

    #[error("Repository handle poisoned by a panicked task")]
    Poisoned,
}

impl GitError {
    /// Whether retrying later could succeed (index or ref lock contention)
    pub fn is_contention(&self) -> bool {
        match self {
            GitError::Git(e) => e.code() == git2::ErrorCode::Locked,
            GitError::Busy(_) => true,
            _ => false,
        }
    }
}
