//! Server engine: bootstraps the repository and wires the cache, watcher and
//! snapshot coordinator together

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use libnanocrud_core::ServerConfig;
use libnanocrud_git::{DataRepository, SharedRepository, VersionControl};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CollectionCache;
use crate::error::ServerError;
use crate::http;
use crate::snapshot::{
    log_report, trigger_channel, SnapshotCoordinator, SnapshotError, SnapshotReport,
    SnapshotTrigger,
};

/// A running nanocrud instance (everything but the listener)
pub struct Engine {
    config: ServerConfig,
    data_dir: PathBuf,
    repository: SharedRepository,
    cache: Arc<CollectionCache>,
    coordinator: Arc<SnapshotCoordinator>,
    trigger: SnapshotTrigger,
    shutdown_tx: broadcast::Sender<()>,
    // Coordinator loop and optional interval ticker
    _tasks: Vec<JoinHandle<()>>,
    // Released on drop
    _lock: File,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Engine {
    /// Prepare the data directory and start the background tasks.
    ///
    /// Fails if the repository cannot be initialized or another process
    /// holds the data directory.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        std::fs::create_dir_all(&config.data)?;
        let data_dir = config.data.canonicalize()?;

        let dir = data_dir.clone();
        let (locked, created) =
            tokio::task::spawn_blocking(move || DataRepository::init_or_open_locked(&dir))
                .await?
                .map_err(ServerError::RepositoryInit)?;
        if created {
            info!("Initialized repository in {}", data_dir.display());
        } else {
            debug!("Using existing repository in {}", data_dir.display());
        }
        let (repo, lock) = locked.into_parts();

        let repository = SharedRepository::new(repo, config.author.clone());
        let vcs: Arc<dyn VersionControl> = Arc::new(repository.clone());
        let cache = Arc::new(CollectionCache::new(
            &data_dir,
            &config.watch,
            Arc::clone(&vcs),
        )?);
        info!(backend = ?cache.watch_backend(), "Watching {}", data_dir.display());

        let coordinator = Arc::new(SnapshotCoordinator::new(
            Arc::clone(&cache),
            vcs,
            config.snapshot.message.clone(),
        ));
        let (trigger, trigger_rx) = trigger_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut tasks = vec![tokio::spawn(Arc::clone(&coordinator).run(trigger_rx))];
        if let Some(every) = config.snapshot.interval() {
            info!("Snapshotting every {:?}", every);
            let trigger = trigger.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                // The first tick completes immediately
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            trigger.fire();
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            }));
        }

        Ok(Self {
            config,
            data_dir,
            repository,
            cache,
            coordinator,
            trigger,
            shutdown_tx,
            _tasks: tasks,
            _lock: lock,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Canonical data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache(&self) -> &Arc<CollectionCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<SnapshotCoordinator> {
        &self.coordinator
    }

    pub fn trigger(&self) -> SnapshotTrigger {
        self.trigger.clone()
    }

    pub fn repository(&self) -> &SharedRepository {
        &self.repository
    }

    /// HTTP routes over this engine's collections
    pub fn router(&self) -> Result<Router, ServerError> {
        http::router(Arc::clone(&self.cache), &self.config)
    }

    /// Stop the interval trigger, then take the final snapshot if configured.
    ///
    /// A triggered run still in progress finishes first.
    pub async fn shutdown(self) -> Result<Option<SnapshotReport>, SnapshotError> {
        let _ = self.shutdown_tx.send(());

        if !self.config.snapshot.on_shutdown {
            return Ok(None);
        }
        info!("Taking final snapshot");
        let report = self.coordinator.snapshot().await?;
        log_report(&report);
        Ok(Some(report))
    }
}
