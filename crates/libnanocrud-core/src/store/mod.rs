//! Append-only document store backing one collection
//!
//! Every live document is kept in memory, keyed by `_id`. Mutations are
//! appended to the datafile and flushed before the in-memory state changes,
//! so a failed write never leaves memory ahead of disk.

mod datafile;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::NanocrudError;
use crate::query::{apply_update, matches, upsert_document};
use crate::types::document::{doc_id, prepare_new, Document};

pub use datafile::{temp_path, CORRUPT_THRESHOLD, DELETED_FIELD};

/// Options for [`DocumentStore::update`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every match instead of only the first
    pub multi: bool,
    /// Insert a new document when nothing matches
    pub upsert: bool,
}

/// Outcome of an update
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub num_affected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted: Option<Document>,
}

/// Statistics about a store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub path: String,
    pub size_bytes: u64,
    pub doc_count: usize,
}

/// A collection's documents plus its append handle on the datafile
pub struct DocumentStore {
    path: PathBuf,
    docs: BTreeMap<String, Document>,
    file: File,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("docs", &self.docs.len())
            .finish()
    }
}

impl DocumentStore {
    /// Open or create the store at `path`.
    ///
    /// The datafile is replayed and then rewritten in compact form.
    pub fn open(path: &Path) -> Result<Self, NanocrudError> {
        let docs = datafile::load(path)?;
        let file = datafile::write_compacted(path, docs.values())?;
        Ok(Self {
            path: path.to_path_buf(),
            docs,
            file,
        })
    }

    /// Path of the datafile
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Documents matching `query`, in `_id` order, after `skip` and `limit`
    pub fn find(
        &self,
        query: &Document,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, NanocrudError> {
        let mut out = Vec::new();
        let mut skipped = 0;
        for doc in self.docs.values() {
            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
            if !matches(doc, query)? {
                continue;
            }
            if skipped < skip {
                skipped += 1;
                continue;
            }
            out.push(doc.clone());
        }
        Ok(out)
    }

    /// Count documents matching `query`
    pub fn count(&self, query: &Document) -> Result<usize, NanocrudError> {
        let mut n = 0;
        for doc in self.docs.values() {
            if matches(doc, query)? {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Insert one document (object) or several (array, all or nothing).
    ///
    /// Returns the stored form(s) with `_id` and timestamps.
    pub fn insert(&mut self, value: Value) -> Result<Value, NanocrudError> {
        let batch = matches!(value, Value::Array(_));
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let doc = prepare_new(item)?;
            let id = doc_id(&doc).unwrap_or_default().to_string();
            if self.docs.contains_key(&id) || prepared.iter().any(|(p, _)| p == &id) {
                return Err(NanocrudError::Conflict(format!(
                    "a document with _id '{}' already exists",
                    id
                )));
            }
            prepared.push((id, doc));
        }

        let mut lines = String::new();
        for (_, doc) in &prepared {
            lines.push_str(&datafile::document_line(doc)?);
        }
        datafile::append(&mut self.file, &lines)?;

        let mut inserted = Vec::with_capacity(prepared.len());
        for (id, doc) in prepared {
            inserted.push(Value::Object(doc.clone()));
            self.docs.insert(id, doc);
        }

        if batch {
            Ok(Value::Array(inserted))
        } else {
            Ok(inserted.pop().unwrap_or(Value::Null))
        }
    }

    /// Update documents matching `query` with `patch`
    pub fn update(
        &mut self,
        query: &Document,
        patch: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, NanocrudError> {
        let mut updated = Vec::new();
        for (id, doc) in &self.docs {
            if !matches(doc, query)? {
                continue;
            }
            updated.push((id.clone(), apply_update(doc, patch)?));
            if !options.multi {
                break;
            }
        }

        if updated.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult {
                    num_affected: 0,
                    upserted: None,
                });
            }
            let seed = upsert_document(query, patch)?;
            let inserted = self.insert(Value::Object(seed))?;
            return Ok(UpdateResult {
                num_affected: 1,
                upserted: inserted.as_object().cloned(),
            });
        }

        let mut lines = String::new();
        for (_, doc) in &updated {
            lines.push_str(&datafile::document_line(doc)?);
        }
        datafile::append(&mut self.file, &lines)?;

        let num_affected = updated.len();
        for (id, doc) in updated {
            self.docs.insert(id, doc);
        }
        Ok(UpdateResult {
            num_affected,
            upserted: None,
        })
    }

    /// Remove documents matching `query`; only the first unless `multi`
    pub fn remove(&mut self, query: &Document, multi: bool) -> Result<usize, NanocrudError> {
        let mut ids = Vec::new();
        for (id, doc) in &self.docs {
            if matches(doc, query)? {
                ids.push(id.clone());
                if !multi {
                    break;
                }
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let mut lines = String::new();
        for id in &ids {
            lines.push_str(&datafile::tombstone_line(id)?);
        }
        datafile::append(&mut self.file, &lines)?;

        for id in &ids {
            self.docs.remove(id);
        }
        Ok(ids.len())
    }

    /// Rewrite the datafile with one line per live document.
    ///
    /// The append handle is swapped only once the new datafile is in place.
    pub fn compact(&mut self) -> Result<(), NanocrudError> {
        self.file = datafile::write_compacted(&self.path, self.docs.values())?;
        Ok(())
    }

    /// Size and document count
    pub fn stats(&self) -> Result<StoreStats, NanocrudError> {
        let size_bytes = fs::metadata(&self.path)?.len();
        Ok(StoreStats {
            path: self.path.display().to_string(),
            size_bytes,
            doc_count: self.docs.len(),
        })
    }
}
