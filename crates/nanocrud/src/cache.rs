//! The collection cache: at most one open handle per collection name

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use libnanocrud_core::{CollectionName, DocumentStore, WatchConfig};
use libnanocrud_git::VersionControl;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::error::ServerError;
use crate::watcher::{WatchBackend, WatchHub};

type Slot = Arc<OnceCell<Arc<Collection>>>;

/// Maps sanitized collection names to open collections.
///
/// Handles are never evicted. Creation is serialized per name by a
/// [`OnceCell`], so concurrent first opens of one name build a single store
/// and a single change watcher, while other names open independently.
pub struct CollectionCache {
    data_dir: PathBuf,
    entries: Mutex<HashMap<CollectionName, Slot>>,
    hub: Arc<WatchHub>,
    vcs: Arc<dyn VersionControl>,
}

impl std::fmt::Debug for CollectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCache")
            .field("data_dir", &self.data_dir)
            .field("hub", &self.hub)
            .finish()
    }
}

impl CollectionCache {
    /// Create an empty cache over `data_dir`, starting its directory watcher
    pub fn new(
        data_dir: &Path,
        watch: &WatchConfig,
        vcs: Arc<dyn VersionControl>,
    ) -> Result<Self, ServerError> {
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            entries: Mutex::new(HashMap::new()),
            hub: Arc::new(WatchHub::new(data_dir, watch)?),
            vcs,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn watch_backend(&self) -> WatchBackend {
        self.hub.backend()
    }

    /// Resolve a raw collection name to its handle, opening it on first use
    pub async fn open(&self, raw: &str) -> Result<Arc<Collection>, ServerError> {
        let name = CollectionName::parse(raw)?;
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(name.clone()).or_default())
        };
        if let Some(collection) = slot.get() {
            return Ok(Arc::clone(collection));
        }

        // Creation completes in its own task even if this caller is dropped.
        // A failed creation leaves the cell empty for the next caller to retry.
        let creator = Creator {
            data_dir: self.data_dir.clone(),
            hub: Arc::clone(&self.hub),
            vcs: Arc::clone(&self.vcs),
        };
        tokio::spawn(async move {
            slot.get_or_try_init(|| creator.create(name))
                .await
                .map(Arc::clone)
        })
        .await?
    }

    /// Every open collection, ordered by name
    pub fn collections(&self) -> Vec<Arc<Collection>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut open: Vec<Arc<Collection>> = entries
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect();
        open.sort_by(|a, b| a.name().cmp(b.name()));
        open
    }

    /// Number of open collections
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a detached creation task needs from the cache
struct Creator {
    data_dir: PathBuf,
    hub: Arc<WatchHub>,
    vcs: Arc<dyn VersionControl>,
}

impl Creator {
    async fn create(self, name: CollectionName) -> Result<Arc<Collection>, ServerError> {
        let path = name.datafile(&self.data_dir);
        let open_path = path.clone();
        let store = tokio::task::spawn_blocking(move || DocumentStore::open(&open_path)).await??;
        info!(
            collection = %name,
            docs = store.len(),
            "Opened collection at {}",
            path.display()
        );

        let watch = self.hub.register(&name, path, self.vcs);
        debug!(collection = %name, "Registered change watcher");
        Ok(Arc::new(Collection::new(name, store, watch)))
    }
}
