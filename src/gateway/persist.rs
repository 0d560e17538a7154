//! Single-lane persistence worker.
//!
//! Disk writes never run on the cluster-state apply path. They are queued
//! here and executed one at a time, in submission order, on a dedicated
//! thread. That gives at most one write per state kind in flight and a
//! total order on the versions that reach disk.

use crate::checkpoint::{LocalStateStore, MetadataSnapshot, StartedShardsSnapshot};
use crate::cluster::MetaData;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Persist the metadata of one cluster state.
#[derive(Debug, Clone)]
pub struct MetadataJob {
    /// Version of the cluster state that triggered the job.
    pub cluster_version: u64,
    /// Metadata to persist; its version names the file.
    pub meta_data: MetaData,
}

/// Persist a precomputed started-shards snapshot.
#[derive(Debug, Clone)]
pub struct StartedShardsJob {
    /// The snapshot to write.
    pub snapshot: StartedShardsSnapshot,
}

/// Work item for the persistence lane.
#[derive(Debug)]
pub enum PersistJob {
    /// Write metadata.
    Metadata(MetadataJob),
    /// Write started shards.
    StartedShards(StartedShardsJob),
    /// Resolve once every job submitted before it has run.
    Barrier(oneshot::Sender<()>),
}

impl PersistJob {
    fn name(&self) -> &'static str {
        match self {
            PersistJob::Metadata(_) => "metadata",
            PersistJob::StartedShards(_) => "started_shards",
            PersistJob::Barrier(_) => "barrier",
        }
    }
}

/// Counters for the persistence lane.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl WorkerStats {
    /// Jobs that ran successfully.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs that ran and failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Jobs dropped because shutdown ran out of time.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }
}

/// Executes persistence jobs against the local state store.
struct JobRunner {
    store: Arc<LocalStateStore>,
    metadata_persisted: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
}

impl JobRunner {
    fn run(&self, job: PersistJob) {
        let name = job.name();
        let result = match job {
            PersistJob::Metadata(job) => self.persist_metadata(job),
            PersistJob::StartedShards(job) => self.persist_started_shards(job),
            PersistJob::Barrier(done) => {
                let _ = done.send(());
                return;
            }
        };

        match result {
            Ok(()) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(job = name, error = %e, "Failed to persist local gateway state");
            }
        }
    }

    fn persist_metadata(&self, job: MetadataJob) -> Result<()> {
        let current = self.store.current_metadata();
        let snapshot = MetadataSnapshot::next(current.as_deref(), &job.meta_data);
        let version = snapshot.version;

        self.store.write_metadata(snapshot)?;
        self.metadata_persisted.store(true, Ordering::SeqCst);

        debug!(
            version,
            cluster_version = job.cluster_version,
            "Persisted metadata"
        );
        Ok(())
    }

    fn persist_started_shards(&self, job: StartedShardsJob) -> Result<()> {
        let version = job.snapshot.version;
        let shards = job.snapshot.len();

        self.store.write_started_shards(job.snapshot)?;

        debug!(version, shards, "Persisted started shards");
        Ok(())
    }
}

/// The persistence lane: one thread, one FIFO queue.
pub struct PersistenceWorker {
    /// Job sender; `None` once shut down.
    tx: Mutex<Option<mpsc::UnboundedSender<PersistJob>>>,

    /// Signals the thread has drained its queue.
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,

    /// Worker thread.
    handle: Mutex<Option<JoinHandle<()>>>,

    /// Set when a shutdown drain timed out; remaining jobs are skipped.
    abandon: Arc<AtomicBool>,

    stats: Arc<WorkerStats>,
}

impl PersistenceWorker {
    /// Spawn the worker thread.
    pub fn start(
        store: Arc<LocalStateStore>,
        metadata_persisted: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();
        let (done_tx, done_rx) = oneshot::channel();
        let abandon = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());

        let runner = JobRunner {
            store,
            metadata_persisted,
            stats: stats.clone(),
        };
        let abandon_flag = abandon.clone();
        let thread_stats = stats.clone();

        let handle = std::thread::Builder::new()
            .name("gateway-persist".to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if abandon_flag.load(Ordering::SeqCst) {
                        if !matches!(job, PersistJob::Barrier(_)) {
                            thread_stats.abandoned.fetch_add(1, Ordering::Relaxed);
                        }
                        continue;
                    }
                    runner.run(job);
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::Internal(format!("failed to spawn persistence thread: {}", e)))?;

        info!("Gateway persistence worker started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            done_rx: Mutex::new(Some(done_rx)),
            handle: Mutex::new(Some(handle)),
            abandon,
            stats,
        })
    }

    /// Queue a job. Returns `false` if the worker is shut down.
    pub fn submit(&self, job: PersistJob) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!(job = job.name(), "Persistence worker stopped, dropping job");
            return false;
        };
        tx.send(job).is_ok()
    }

    /// Wait until every job submitted before this call has run.
    pub async fn sync(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.submit(PersistJob::Barrier(done_tx)) {
            return Err(Error::NotStarted);
        }
        done_rx.await.map_err(|_| Error::NotStarted)
    }

    /// Whether jobs are still accepted.
    pub fn is_running(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Counters.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Stop accepting jobs and wait up to `timeout` for the queue to drain.
    ///
    /// Jobs still queued at the deadline are abandoned; the next cluster
    /// state change will trigger persistence again if it is still needed.
    pub async fn shutdown(&self, timeout: Duration) {
        // Dropping the sender ends the worker loop once the queue is empty.
        if self.tx.lock().take().is_none() {
            return;
        }

        let done_rx = self.done_rx.lock().take();
        let drained = match done_rx {
            Some(rx) => tokio::time::timeout(timeout, rx).await.is_ok(),
            None => true,
        };

        if drained {
            if let Some(handle) = self.handle.lock().take() {
                let _ = handle.join();
            }
            info!(
                completed = self.stats.completed(),
                failed = self.stats.failed(),
                "Gateway persistence worker stopped"
            );
        } else {
            self.abandon.store(true, Ordering::SeqCst);
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Persistence worker did not drain in time, abandoning queued jobs"
            );
        }
    }
}

impl std::fmt::Debug for PersistenceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWorker")
            .field("running", &self.is_running())
            .field("completed", &self.stats.completed())
            .field("failed", &self.stats.failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, NodeEnvironment};
    use crate::types::{NodeRoles, ShardId};
    use tempfile::{tempdir, TempDir};

    fn worker() -> (PersistenceWorker, Arc<LocalStateStore>, Arc<AtomicBool>, TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStateStore::new(
            NodeEnvironment::new([dir.path().join("data")]),
            &GatewayConfig::default(),
            NodeRoles::master_and_data(),
        ));
        let persisted = Arc::new(AtomicBool::new(false));
        let worker = PersistenceWorker::start(store.clone(), persisted.clone()).unwrap();
        (worker, store, persisted, dir)
    }

    fn metadata_job(version: u64) -> PersistJob {
        PersistJob::Metadata(MetadataJob {
            cluster_version: version + 100,
            meta_data: MetaData::default().with_version(version),
        })
    }

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let (worker, store, persisted, _dir) = worker();

        for version in 1..=5 {
            assert!(worker.submit(metadata_job(version)));
        }
        worker.sync().await.unwrap();

        assert_eq!(store.current_metadata().unwrap().version, 5);
        assert!(persisted.load(Ordering::SeqCst));
        assert_eq!(worker.stats().completed(), 5);
        assert_eq!(
            store.find_latest::<MetadataSnapshot>().unwrap().file.version,
            5
        );
    }

    #[tokio::test]
    async fn test_started_shards_job() {
        let (worker, store, persisted, _dir) = worker();

        let mut snapshot = StartedShardsSnapshot::new(12);
        snapshot.put(ShardId::new("logs", 0), 3);
        worker.submit(PersistJob::StartedShards(StartedShardsJob { snapshot }));
        worker.sync().await.unwrap();

        let current = store.current_started_shards().unwrap();
        assert_eq!(current.version, 12);
        assert_eq!(current.get(&ShardId::new("logs", 0)), Some(3));
        assert!(!persisted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_job_is_counted() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"file").unwrap();
        let store = Arc::new(LocalStateStore::new(
            NodeEnvironment::new([blocked]),
            &GatewayConfig::default(),
            NodeRoles::master_only(),
        ));
        let persisted = Arc::new(AtomicBool::new(false));
        let worker = PersistenceWorker::start(store.clone(), persisted.clone()).unwrap();

        worker.submit(metadata_job(1));
        worker.sync().await.unwrap();

        assert_eq!(worker.stats().failed(), 1);
        assert!(!persisted.load(Ordering::SeqCst));
        assert!(store.current_metadata().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let (worker, store, _persisted, _dir) = worker();

        for version in 1..=3 {
            worker.submit(metadata_job(version));
        }
        worker.shutdown(Duration::from_secs(10)).await;

        assert!(!worker.is_running());
        assert_eq!(store.current_metadata().unwrap().version, 3);
        assert!(!worker.submit(metadata_job(4)));
        assert!(matches!(worker.sync().await, Err(Error::NotStarted)));

        // Second shutdown is a no-op.
        worker.shutdown(Duration::from_millis(1)).await;
    }
}
