//! Change watching for collection datafiles
//!
//! One filesystem watcher covers the data directory (native notifications,
//! falling back to polling where those are unavailable). Events are routed by
//! file name to a per-collection [`ChangeWatcher`] task, which waits for a
//! quiet period, checks that the datafile's modification stamp advanced and
//! stages it. A failed stage is logged and retried on the next change; the
//! snapshot pass stages unconditionally anyway.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use libnanocrud_core::{CollectionName, WatchConfig};
use libnanocrud_git::VersionControl;
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ServerError;

type Routes = Arc<Mutex<HashMap<String, mpsc::Sender<()>>>>;

/// Which notification backend the hub ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchBackend {
    Native,
    Polling,
}

/// Owns the directory watcher and routes its events to change watchers
pub struct WatchHub {
    routes: Routes,
    backend: WatchBackend,
    debounce: Duration,
    // Dropping the watcher stops notifications
    _watcher: Mutex<Box<dyn Watcher + Send>>,
}

impl std::fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHub")
            .field("backend", &self.backend)
            .field("debounce", &self.debounce)
            .finish()
    }
}

impl WatchHub {
    /// Start watching `data_dir` (non-recursively)
    pub fn new(data_dir: &Path, config: &WatchConfig) -> Result<Self, ServerError> {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

        let native = RecommendedWatcher::new(
            event_router(Arc::clone(&routes)),
            Config::default().with_compare_contents(false),
        )
        .and_then(|mut w| {
            w.watch(data_dir, RecursiveMode::NonRecursive)?;
            Ok(w)
        });

        let (watcher, backend): (Box<dyn Watcher + Send>, WatchBackend) = match native {
            Ok(w) => {
                debug!("Using native watcher for {}", data_dir.display());
                (Box::new(w), WatchBackend::Native)
            }
            Err(e) => {
                warn!(
                    "Native watcher failed for {}: {}, falling back to polling",
                    data_dir.display(),
                    e
                );
                let mut poll = PollWatcher::new(
                    event_router(Arc::clone(&routes)),
                    Config::default()
                        .with_poll_interval(config.poll_interval())
                        .with_compare_contents(false),
                )?;
                poll.watch(data_dir, RecursiveMode::NonRecursive)?;
                (Box::new(poll), WatchBackend::Polling)
            }
        };

        Ok(Self {
            routes,
            backend,
            debounce: config.debounce(),
            _watcher: Mutex::new(watcher),
        })
    }

    pub fn backend(&self) -> WatchBackend {
        self.backend
    }

    /// Register a change watcher for one collection's datafile.
    ///
    /// Must be called from within the tokio runtime. The registration lives
    /// for the rest of the process.
    pub fn register(
        &self,
        name: &CollectionName,
        path: PathBuf,
        vcs: Arc<dyn VersionControl>,
    ) -> WatchRegistration {
        // Capacity one: a pending signal already covers any later event
        let (tx, rx) = mpsc::channel(1);
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), tx);

        let watcher = ChangeWatcher {
            rel_path: name.to_string(),
            last_staged: file_stamp(&path),
            path,
            debounce: self.debounce,
            vcs,
        };
        WatchRegistration {
            task: tokio::spawn(watcher.run(rx)),
        }
    }
}

/// Build the notify callback: wake the watcher registered for each touched file
fn event_router(routes: Routes) -> impl Fn(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error: {}", e);
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        ) {
            return;
        }

        let routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
        for path in &event.paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(tx) = routes.get(file_name) {
                // Full means a wake-up is already pending
                let _ = tx.try_send(());
            }
        }
    }
}

/// Handle to a running change watcher
#[derive(Debug)]
pub struct WatchRegistration {
    task: JoinHandle<()>,
}

impl WatchRegistration {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Modification time and length of a file; `None` when it is missing
type FileStamp = Option<(SystemTime, u64)>;

fn file_stamp(path: &Path) -> FileStamp {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Stages one datafile when its modification stamp advances
struct ChangeWatcher {
    path: PathBuf,
    rel_path: String,
    debounce: Duration,
    last_staged: FileStamp,
    vcs: Arc<dyn VersionControl>,
}

impl ChangeWatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<()>) {
        while rx.recv().await.is_some() {
            // Collapse a burst of writes into one stage per quiet period
            loop {
                match tokio::time::timeout(self.debounce, rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) | Err(_) => break,
                }
            }
            self.stage_if_changed().await;
        }
        debug!(collection = %self.rel_path, "Change watcher stopped");
    }

    async fn stage_if_changed(&mut self) {
        let path = self.path.clone();
        let stamp = tokio::task::spawn_blocking(move || file_stamp(&path))
            .await
            .unwrap_or(None);
        if stamp.is_some() && stamp == self.last_staged {
            debug!(collection = %self.rel_path, "Datafile unchanged, not staging");
            return;
        }

        let vcs = Arc::clone(&self.vcs);
        let rel_path = self.rel_path.clone();
        let staged = tokio::task::spawn_blocking(move || vcs.add(&rel_path)).await;
        match staged {
            Ok(Ok(())) => {
                self.last_staged = stamp;
                info!(collection = %self.rel_path, "Staged datafile change");
            }
            Ok(Err(e)) => {
                warn!(collection = %self.rel_path, "Failed to stage change: {}", e);
            }
            Err(e) => {
                warn!(collection = %self.rel_path, "Stage task failed: {}", e);
            }
        }
    }
}
