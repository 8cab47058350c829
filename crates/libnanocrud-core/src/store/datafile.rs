//! On-disk datafile format
//!
//! One JSON object per line. Inserts and updates append the full document;
//! removals append a tombstone `{"$$deleted":true,"_id":"..."}`. The last
//! line for an id wins.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::NanocrudError;
use crate::types::document::{doc_id, Document, ID_FIELD};

/// Tombstone marker field
pub const DELETED_FIELD: &str = "$$deleted";

/// Share of unreadable lines tolerated on load
pub const CORRUPT_THRESHOLD: f64 = 0.1;

/// Temp file compaction writes before renaming over the datafile
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push("~");
    PathBuf::from(name)
}

/// Serialize a live document as one datafile line
pub fn document_line(doc: &Document) -> Result<String, NanocrudError> {
    let mut line = serde_json::to_string(doc)?;
    line.push('\n');
    Ok(line)
}

/// Serialize a tombstone line for `id`
pub fn tombstone_line(id: &str) -> Result<String, NanocrudError> {
    let mut line = serde_json::to_string(&serde_json::json!({
        DELETED_FIELD: true,
        ID_FIELD: id,
    }))?;
    line.push('\n');
    Ok(line)
}

/// Replay a datafile into the live document set.
///
/// A missing datafile with a leftover temp file means a compaction was
/// interrupted after writing; the temp file is promoted.
pub fn load(path: &Path) -> Result<BTreeMap<String, Document>, NanocrudError> {
    if !path.exists() {
        let temp = temp_path(path);
        if temp.is_file() {
            fs::rename(&temp, path)?;
        } else {
            File::create(path)?;
            return Ok(BTreeMap::new());
        }
    }

    let content = fs::read(path)?;
    let mut docs = BTreeMap::new();
    let mut total = 0usize;
    let mut bad = 0usize;

    let lines = content
        .split(|b| *b == b'\n')
        .filter(|l| !l.iter().all(u8::is_ascii_whitespace));
    for line in lines {
        total += 1;
        // Invalid UTF-8 fails here too and counts as a bad line
        let Ok(Value::Object(doc)) = serde_json::from_slice::<Value>(line) else {
            bad += 1;
            continue;
        };
        let Some(id) = doc_id(&doc).map(str::to_string) else {
            bad += 1;
            continue;
        };
        if doc.get(DELETED_FIELD) == Some(&Value::Bool(true)) {
            docs.remove(&id);
        } else {
            docs.insert(id, doc);
        }
    }

    if total > 0 && (bad as f64 / total as f64) > CORRUPT_THRESHOLD {
        return Err(NanocrudError::Corrupt {
            path: path.display().to_string(),
            bad,
            total,
        });
    }
    Ok(docs)
}

/// Append pre-serialized lines and flush them to disk.
///
/// On failure the file is truncated back to its previous length, so a
/// partial line never merges with the next append.
pub fn append(file: &mut File, lines: &str) -> Result<(), NanocrudError> {
    write_or_truncate(file, |f| {
        f.write_all(lines.as_bytes())?;
        f.sync_data()
    })
}

fn write_or_truncate(
    file: &mut File,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> Result<(), NanocrudError> {
    let len = file.metadata()?.len();
    if let Err(e) = write(file) {
        if let Err(truncate) = file.set_len(len) {
            return Err(NanocrudError::Internal(format!(
                "append failed ({}) and the partial write could not be removed: {}",
                e, truncate
            )));
        }
        return Err(e.into());
    }
    Ok(())
}

/// Rewrite the datafile with one line per live document.
///
/// Writes `<path>~`, syncs it, opens the append handle on it, then renames
/// it over `path`. Returns that handle, which follows the file through the
/// rename. On failure the original datafile is untouched.
pub fn write_compacted<'a>(
    path: &Path,
    docs: impl Iterator<Item = &'a Document>,
) -> Result<File, NanocrudError> {
    let temp = temp_path(path);
    let mut buf = String::new();
    for doc in docs {
        buf.push_str(&document_line(doc)?);
    }

    let mut file = File::create(&temp)?;
    let written = file
        .write_all(buf.as_bytes())
        .and_then(|_| file.sync_all())
        .and_then(|_| OpenOptions::new().append(true).open(&temp))
        .and_then(|handle| fs::rename(&temp, path).map(|_| handle));
    match written {
        Ok(handle) => Ok(handle),
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e.into())
        }
    }
}
