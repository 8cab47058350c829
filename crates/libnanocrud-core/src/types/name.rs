use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::NanocrudError;

/// Longest basename most filesystems accept
const MAX_NAME_LEN: usize = 255;

/// A sanitized collection name, safe to join onto the data directory.
///
/// Only the final path component of the raw input survives, so
/// `../../etc/users` and `users` name the same collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionName(String);

impl CollectionName {
    /// Sanitize a user-supplied name down to its basename.
    pub fn parse(raw: &str) -> Result<Self, NanocrudError> {
        if raw.is_empty() {
            return Err(NanocrudError::InvalidName("name is empty".to_string()));
        }
        if raw.contains('\0') {
            return Err(NanocrudError::InvalidName("name contains NUL".to_string()));
        }

        let trimmed = raw.trim_end_matches(['/', '\\']);
        let base = trimmed
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();

        if base.is_empty() || base == "." || base == ".." {
            return Err(NanocrudError::InvalidName(format!(
                "'{}' has no usable basename",
                raw
            )));
        }
        // Leading dots would reach .git; trailing tildes are compaction temp files
        if base.starts_with('.') || base.ends_with('~') {
            return Err(NanocrudError::InvalidName(format!(
                "'{}' is reserved",
                base
            )));
        }
        if base.len() > MAX_NAME_LEN {
            return Err(NanocrudError::InvalidName(format!(
                "name longer than {} bytes",
                MAX_NAME_LEN
            )));
        }

        Ok(Self(base.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the backing datafile inside `data_dir`
    pub fn datafile(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.0)
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        let name = CollectionName::parse("users").unwrap();
        assert_eq!(name.as_str(), "users");
    }

    #[test]
    fn test_traversal_collapses_to_basename() {
        let a = CollectionName::parse("../../etc/users").unwrap();
        let b = CollectionName::parse("users").unwrap();
        let c = CollectionName::parse("/abs/path/users/").unwrap();
        let d = CollectionName::parse("..\\..\\users").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c, d);
    }

    #[test]
    fn test_rejects_empty_and_dots() {
        for raw in ["", "/", "..", ".", "a/..", "///"] {
            let err = CollectionName::parse(raw).unwrap_err();
            assert!(matches!(err, NanocrudError::InvalidName(_)), "{raw:?}");
        }
    }

    #[test]
    fn test_rejects_reserved() {
        assert!(CollectionName::parse(".git").is_err());
        assert!(CollectionName::parse("x/.hidden").is_err());
        assert!(CollectionName::parse("users~").is_err());
        assert!(CollectionName::parse("us\0ers").is_err());
        assert!(CollectionName::parse(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_datafile_stays_in_data_dir() {
        let name = CollectionName::parse("../../../tmp/evil").unwrap();
        let path = name.datafile(Path::new("/srv/data"));
        assert_eq!(path, PathBuf::from("/srv/data/evil"));
    }
}
