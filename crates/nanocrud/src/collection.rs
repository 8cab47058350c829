//! A collection handle: one open store plus its watch registration

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use libnanocrud_core::{CollectionName, Document, DocumentStore, NanocrudError, StoreStats};
use libnanocrud_core::{UpdateOptions, UpdateResult};
use serde_json::Value;

use crate::error::ServerError;
use crate::watcher::WatchRegistration;

/// An open collection.
///
/// Store calls run on the blocking pool; the store mutex serializes them.
pub struct Collection {
    name: CollectionName,
    path: PathBuf,
    store: Arc<Mutex<DocumentStore>>,
    watch: WatchRegistration,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl Collection {
    pub(crate) fn new(
        name: CollectionName,
        store: DocumentStore,
        watch: WatchRegistration,
    ) -> Self {
        Self {
            path: store.path().to_path_buf(),
            name,
            store: Arc::new(Mutex::new(store)),
            watch,
        }
    }

    pub fn name(&self) -> &CollectionName {
        &self.name
    }

    /// Backing datafile
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the change watcher task is still alive
    pub fn is_watched(&self) -> bool {
        self.watch.is_active()
    }

    pub async fn find(
        &self,
        query: Document,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, ServerError> {
        self.with_store(move |store| store.find(&query, skip, limit))
            .await
    }

    pub async fn count(&self, query: Document) -> Result<usize, ServerError> {
        self.with_store(move |store| store.count(&query)).await
    }

    /// Insert a document or an array of documents
    pub async fn insert(&self, value: Value) -> Result<Value, ServerError> {
        self.with_store(move |store| store.insert(value)).await
    }

    pub async fn update(
        &self,
        query: Document,
        patch: Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult, ServerError> {
        self.with_store(move |store| store.update(&query, &patch, options))
            .await
    }

    pub async fn remove(&self, query: Document, multi: bool) -> Result<usize, ServerError> {
        self.with_store(move |store| store.remove(&query, multi))
            .await
    }

    /// Rewrite the datafile without obsolete lines
    pub async fn compact(&self) -> Result<(), ServerError> {
        self.with_store(|store| store.compact()).await
    }

    pub async fn stats(&self) -> Result<StoreStats, ServerError> {
        self.with_store(|store| store.stats()).await
    }

    async fn with_store<R, F>(&self, f: F) -> Result<R, ServerError>
    where
        R: Send + 'static,
        F: FnOnce(&mut DocumentStore) -> Result<R, NanocrudError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = store.lock().map_err(|_| {
                NanocrudError::Internal("store poisoned by a panicked task".to_string())
            })?;
            f(&mut *guard)
        })
        .await?;
        Ok(result?)
    }
}
