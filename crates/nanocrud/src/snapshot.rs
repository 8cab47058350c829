//! Snapshot coordination: compact, stage and commit every open collection
//!
//! A snapshot runs in three steps:
//! 1. Compact every open collection in parallel. Failures are recorded in the
//!    report and skipped.
//! 2. Stage every open collection's datafile, whether or not the watcher
//!    already did. The first failure aborts the snapshot.
//! 3. Commit once, after every stage has finished.
//!
//! Runs are serialized by a lock. [`SnapshotTrigger`] feeds a single
//! coordinator task through a capacity-one channel, so triggers that arrive
//! during a run collapse into one follow-up run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use libnanocrud_git::{CommitOutcome, GitError, Oid, VersionControl};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::CollectionCache;

/// Errors that abort a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to stage {collection}: {source}")]
    Stage {
        collection: String,
        #[source]
        source: GitError,
    },

    #[error("commit failed: {0}")]
    Commit(#[source] GitError),

    /// A blocking task panicked or was cancelled
    #[error("snapshot task failed: {0}")]
    Task(String),
}

/// A collection whose compaction failed during a snapshot
#[derive(Debug, Clone)]
pub struct CompactionFailure {
    pub collection: String,
    pub error: String,
}

/// Result of a completed snapshot
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub outcome: CommitOutcome,
    /// Collections staged in this run, ordered by name
    pub collections: Vec<String>,
    pub compaction_failures: Vec<CompactionFailure>,
}

impl SnapshotReport {
    pub fn commit(&self) -> Option<Oid> {
        self.outcome.head()
    }
}

/// Outcome of the most recent triggered run, for operational visibility
#[derive(Debug, Clone)]
pub struct LastSnapshot {
    /// Sequence number, starting at 1
    pub run: u64,
    pub head: Option<Oid>,
    pub created: bool,
    pub error: Option<String>,
}

/// Runs snapshots against the cache's collections
pub struct SnapshotCoordinator {
    cache: Arc<CollectionCache>,
    vcs: Arc<dyn VersionControl>,
    message: String,
    running: Mutex<()>,
    runs: AtomicU64,
    status: watch::Sender<Option<LastSnapshot>>,
}

impl std::fmt::Debug for SnapshotCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCoordinator")
            .field("message", &self.message)
            .field("runs", &self.runs.load(Ordering::Relaxed))
            .finish()
    }
}

impl SnapshotCoordinator {
    pub fn new(
        cache: Arc<CollectionCache>,
        vcs: Arc<dyn VersionControl>,
        message: impl Into<String>,
    ) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            cache,
            vcs,
            message: message.into(),
            running: Mutex::new(()),
            runs: AtomicU64::new(0),
            status,
        }
    }

    /// Watch the outcome of triggered runs
    pub fn subscribe(&self) -> watch::Receiver<Option<LastSnapshot>> {
        self.status.subscribe()
    }

    /// Compact, stage and commit every open collection.
    ///
    /// Waits for any run already in progress.
    pub async fn snapshot(&self) -> Result<SnapshotReport, SnapshotError> {
        let _running = self.running.lock().await;
        let collections = self.cache.collections();
        debug!(count = collections.len(), "Snapshot started");

        let mut compactions = JoinSet::new();
        for collection in &collections {
            let collection = Arc::clone(collection);
            compactions.spawn(async move {
                let result = collection.compact().await;
                (collection.name().to_string(), result)
            });
        }
        let mut compaction_failures = Vec::new();
        while let Some(joined) = compactions.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    warn!(collection = %name, "Compaction failed, staging as is: {}", e);
                    compaction_failures.push(CompactionFailure {
                        collection: name,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(SnapshotError::Task(e.to_string())),
            }
        }
        compaction_failures.sort_by(|a, b| a.collection.cmp(&b.collection));

        let names: Vec<String> = collections.iter().map(|c| c.name().to_string()).collect();
        let vcs = Arc::clone(&self.vcs);
        let message = self.message.clone();
        let staged = names.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            for name in &staged {
                vcs.add(name).map_err(|source| SnapshotError::Stage {
                    collection: name.clone(),
                    source,
                })?;
            }
            vcs.commit(&message).map_err(SnapshotError::Commit)
        })
        .await
        .map_err(|e| SnapshotError::Task(e.to_string()))??;

        Ok(SnapshotReport {
            outcome,
            collections: names,
            compaction_failures,
        })
    }

    /// Drain trigger requests until every [`SnapshotTrigger`] is dropped
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<()>) {
        while rx.recv().await.is_some() {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let last = match self.snapshot().await {
                Ok(report) => {
                    log_report(&report);
                    LastSnapshot {
                        run,
                        head: report.commit(),
                        created: report.outcome.is_created(),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(run, "Snapshot failed: {}", e);
                    LastSnapshot {
                        run,
                        head: None,
                        created: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            self.status.send_replace(Some(last));
        }
        debug!("Snapshot trigger closed");
    }
}

/// Log a finished snapshot
pub fn log_report(report: &SnapshotReport) {
    match report.outcome {
        CommitOutcome::Created(oid) => info!(
            commit = %oid,
            collections = report.collections.len(),
            compaction_failures = report.compaction_failures.len(),
            "Snapshot committed"
        ),
        CommitOutcome::Unchanged(_) => info!(
            collections = report.collections.len(),
            "Snapshot found nothing to commit"
        ),
    }
}

/// Fire-and-forget handle for requesting a snapshot
#[derive(Debug, Clone)]
pub struct SnapshotTrigger {
    tx: mpsc::Sender<()>,
}

impl SnapshotTrigger {
    /// Request a snapshot. Returns false when the request was coalesced into
    /// one already pending, or the coordinator has stopped.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Snapshot already pending, coalescing");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Snapshot coordinator stopped, trigger ignored");
                false
            }
        }
    }
}

/// A trigger and the receiver for [`SnapshotCoordinator::run`]
pub fn trigger_channel() -> (SnapshotTrigger, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (SnapshotTrigger { tx }, rx)
}
