//! The data directory's git repository
//!
//! Collection datafiles live at the top of the work tree and are staged by
//! their basename. Commits go to `HEAD`.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use fs2::FileExt;
use git2::{
    Commit, DiffOptions, ErrorCode, Oid, Repository, Signature, Sort, Status, StatusOptions,
};
use libnanocrud_core::Author;

use crate::GitError;

/// Lock file inside `.git` held for the lifetime of a server process
pub const LOCK_FILE: &str = "nanocrud.lock";

/// Result of a commit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was written
    Created(Oid),
    /// The index matched `HEAD` (or was empty on an unborn branch); nothing written
    Unchanged(Option<Oid>),
}

impl CommitOutcome {
    /// The commit `HEAD` points at after the attempt
    pub fn head(&self) -> Option<Oid> {
        match self {
            CommitOutcome::Created(oid) => Some(*oid),
            CommitOutcome::Unchanged(oid) => *oid,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CommitOutcome::Created(_))
    }
}

/// Summary of one commit in the log
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub oid: Oid,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since the Unix epoch
    pub time: i64,
}

/// Repository rooted at a data directory
pub struct DataRepository {
    repo: Repository,
    workdir: PathBuf,
}

impl std::fmt::Debug for DataRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRepository")
            .field("workdir", &self.workdir)
            .finish()
    }
}

/// A repository plus an exclusive lock on it.
///
/// The lock is released when dropped. It keeps a second server process from
/// staging and committing into the same repository.
#[derive(Debug)]
pub struct LockedRepository {
    lock_file: File,
    repo: DataRepository,
}

impl LockedRepository {
    /// Split into the repository and the lock; the lock holds while the `File` lives
    pub fn into_parts(self) -> (DataRepository, File) {
        (self.repo, self.lock_file)
    }
}

impl std::ops::Deref for LockedRepository {
    type Target = DataRepository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

impl DataRepository {
    /// Open the repository whose work tree is exactly `dir`
    pub fn open(dir: &Path) -> Result<Self, GitError> {
        let repo = Repository::open(dir)?;
        Self::from_repo(repo, dir)
    }

    /// Open the repository at `dir`, initializing one if absent.
    ///
    /// Returns the repository and whether it was created.
    pub fn init_or_open(dir: &Path) -> Result<(Self, bool), GitError> {
        match Repository::open(dir) {
            Ok(repo) => Ok((Self::from_repo(repo, dir)?, false)),
            Err(e) if e.code() == ErrorCode::NotFound => {
                let repo = Repository::init(dir)?;
                Ok((Self::from_repo(repo, dir)?, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`init_or_open`](Self::init_or_open), also taking the process lock (non-blocking)
    pub fn init_or_open_locked(dir: &Path) -> Result<(LockedRepository, bool), GitError> {
        let (repo, created) = Self::init_or_open(dir)?;
        let lock_path = repo.repo.path().join(LOCK_FILE);
        let lock_file = File::create(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|e| {
            GitError::Busy(format!(
                "{} is locked by another process: {}",
                dir.display(),
                e
            ))
        })?;
        Ok((
            LockedRepository { lock_file, repo },
            created,
        ))
    }

    fn from_repo(repo: Repository, dir: &Path) -> Result<Self, GitError> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::NotARepo(format!("{} is a bare repository", dir.display())))?
            .to_path_buf();
        Ok(Self { repo, workdir })
    }

    /// Work tree root
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Stage the current content of `rel_path`; a missing file is unstaged from the index
    pub fn add(&self, rel_path: &str) -> Result<(), GitError> {
        let path = checked_relative(rel_path)?;
        let mut index = self.repo.index()?;
        index.read(false)?;
        if self.workdir.join(path).exists() {
            index.add_path(path)?;
        } else {
            index.remove_path(path)?;
        }
        index.write()?;
        Ok(())
    }

    /// Commit the index to `HEAD`.
    ///
    /// When the index tree equals `HEAD`'s tree no commit is created.
    pub fn commit(&self, message: &str, author: &Author) -> Result<CommitOutcome, GitError> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        let tree_oid = index.write_tree()?;
        let parent = self.head_commit()?;

        match &parent {
            Some(p) if p.tree_id() == tree_oid => {
                return Ok(CommitOutcome::Unchanged(Some(p.id())))
            }
            None if index.is_empty() => return Ok(CommitOutcome::Unchanged(None)),
            _ => {}
        }

        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Signature::now(&author.name, &author.email)?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(CommitOutcome::Created(oid))
    }

    /// Current `HEAD` commit id, `None` on an unborn branch
    pub fn head(&self) -> Result<Option<Oid>, GitError> {
        Ok(self.head_commit()?.map(|c| c.id()))
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?)),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Paths whose index entry differs from `HEAD`
    pub fn staged_paths(&self) -> Result<Vec<String>, GitError> {
        let staged = Status::INDEX_NEW
            | Status::INDEX_MODIFIED
            | Status::INDEX_DELETED
            | Status::INDEX_RENAMED
            | Status::INDEX_TYPECHANGE;

        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);

        let mut paths = Vec::new();
        for entry in self.repo.statuses(Some(&mut opts))?.iter() {
            if entry.status().intersects(staged) {
                if let Some(path) = entry.path() {
                    paths.push(path.to_string());
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Up to `limit` commits reachable from `HEAD`, newest first
    pub fn log(&self, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TIME)?;

        let mut out = Vec::new();
        for oid in walk.take(limit) {
            let commit = self.repo.find_commit(oid?)?;
            let author = commit.author();
            out.push(CommitInfo {
                oid: commit.id(),
                message: commit.message().unwrap_or("").to_string(),
                author_name: author.name().unwrap_or("").to_string(),
                author_email: author.email().unwrap_or("").to_string(),
                time: commit.time().seconds(),
            });
        }
        Ok(out)
    }

    /// Files touched by `oid` relative to its first parent (or the empty tree)
    pub fn changed_paths(&self, oid: Oid) -> Result<Vec<String>, GitError> {
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut opts = DiffOptions::new();
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

        let mut paths: Vec<String> = diff
            .deltas()
            .filter_map(|d| d.new_file().path().or_else(|| d.old_file().path()))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    /// Content of `rel_path` as committed in `oid`, `None` if absent
    pub fn file_at(&self, oid: Oid, rel_path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let path = checked_relative(rel_path)?;
        let tree = self.repo.find_commit(oid)?.tree()?;
        let entry = match tree.get_path(path) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob = self.repo.find_blob(entry.id())?;
        Ok(Some(blob.content().to_vec()))
    }
}

/// Accept only plain relative paths that stay inside the work tree
fn checked_relative(rel_path: &str) -> Result<&Path, GitError> {
    let path = Path::new(rel_path);
    let plain = !rel_path.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(GitError::InvalidPath(rel_path.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DataRepository) {
        let temp = TempDir::new().unwrap();
        let (repo, created) = DataRepository::init_or_open(temp.path()).unwrap();
        assert!(created);
        (temp, repo)
    }

    fn author() -> Author {
        Author {
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        let (temp, _repo) = setup();
        let (_again, created) = DataRepository::init_or_open(temp.path()).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_empty_commit_is_unchanged() {
        let (_temp, repo) = setup();
        let outcome = repo.commit("nothing", &author()).unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged(None));
        assert!(repo.log(10).unwrap().is_empty());
    }

    #[test]
    fn test_add_and_commit() {
        let (temp, repo) = setup();
        std::fs::write(temp.path().join("users"), "{\"name\":\"Ann\"}\n").unwrap();

        repo.add("users").unwrap();
        assert_eq!(repo.staged_paths().unwrap(), vec!["users".to_string()]);

        let outcome = repo.commit("first", &author()).unwrap();
        let oid = outcome.head().unwrap();
        assert!(outcome.is_created());
        assert!(repo.staged_paths().unwrap().is_empty());
        assert_eq!(repo.head().unwrap(), Some(oid));
        assert_eq!(repo.changed_paths(oid).unwrap(), vec!["users".to_string()]);

        let content = repo.file_at(oid, "users").unwrap().unwrap();
        assert!(String::from_utf8(content).unwrap().contains("Ann"));
        assert!(repo.file_at(oid, "other").unwrap().is_none());

        let log = repo.log(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "first");
        assert_eq!(log[0].author_email, "test@example.com");
    }

    #[test]
    fn test_second_commit_without_changes_is_unchanged() {
        let (temp, repo) = setup();
        std::fs::write(temp.path().join("c"), "a\n").unwrap();
        repo.add("c").unwrap();
        let first = repo.commit("one", &author()).unwrap().head();

        // Re-adding identical content is a no-op
        repo.add("c").unwrap();
        let second = repo.commit("two", &author()).unwrap();
        assert_eq!(second, CommitOutcome::Unchanged(first));
        assert_eq!(repo.log(10).unwrap().len(), 1);
    }

    #[test]
    fn test_add_missing_file_stages_deletion() {
        let (temp, repo) = setup();
        let file = temp.path().join("c");
        std::fs::write(&file, "a\n").unwrap();
        repo.add("c").unwrap();
        repo.commit("one", &author()).unwrap();

        std::fs::remove_file(&file).unwrap();
        repo.add("c").unwrap();
        let oid = repo.commit("two", &author()).unwrap().head().unwrap();
        assert!(repo.file_at(oid, "c").unwrap().is_none());
        assert_eq!(repo.changed_paths(oid).unwrap(), vec!["c".to_string()]);
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let (_temp, repo) = setup();
        for bad in ["", "../x", "/etc/passwd", "a/../../b", "./c"] {
            assert!(matches!(repo.add(bad), Err(GitError::InvalidPath(_))), "{bad}");
        }
    }

    #[test]
    fn test_process_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let (first, created) = DataRepository::init_or_open_locked(temp.path()).unwrap();
        assert!(created);

        let second = DataRepository::init_or_open_locked(temp.path());
        assert!(matches!(second, Err(GitError::Busy(_))));

        drop(first);
        assert!(DataRepository::init_or_open_locked(temp.path()).is_ok());
    }
}
