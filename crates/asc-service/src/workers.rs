//! Media worker pool.
//!
//! A fixed set of workers is created at boot. Sessions are spread across
//! them round-robin through a lock-free cursor. Each worker gets a watcher
//! task that waits on its death signal and notifies every registered
//! handler; there is no in-process recovery, the binary's handler takes the
//! process down so a supervisor can restart it.

use crate::engine::{MediaEngine, MediaWorker, WorkerDeath, WorkerId, WorkerSettings};
use crate::errors::AscError;
use crate::observability::metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

/// Callback invoked when a worker dies.
pub type WorkerDeathHandler = Arc<dyn Fn(&WorkerDeath) + Send + Sync>;

#[derive(Default)]
struct DeathRegistry {
    handlers: Vec<WorkerDeathHandler>,
    deaths: Vec<WorkerDeath>,
}

/// Shared between the pool and its watcher tasks.
#[derive(Default)]
struct DeathNotifier {
    inner: Mutex<DeathRegistry>,
}

impl DeathNotifier {
    fn lock(&self) -> MutexGuard<'_, DeathRegistry> {
        // Handlers never panic while holding the lock; recover if one did.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, death: WorkerDeath) {
        let handlers = {
            let mut registry = self.lock();
            registry.deaths.push(death.clone());
            registry.handlers.clone()
        };
        for handler in handlers {
            handler(&death);
        }
    }

    fn register(&self, handler: WorkerDeathHandler) {
        let past = {
            let mut registry = self.lock();
            registry.handlers.push(Arc::clone(&handler));
            registry.deaths.clone()
        };
        // A worker that died before anyone listened is still reported.
        for death in &past {
            handler(death);
        }
    }
}

/// Fixed-size pool of media workers.
pub struct WorkerPool {
    workers: Vec<Arc<dyn MediaWorker>>,
    cursor: AtomicUsize,
    notifier: Arc<DeathNotifier>,
    watchers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create `count` workers and start watching them.
    ///
    /// # Errors
    ///
    /// - `AscError::Config` if `count` is zero
    /// - `AscError::EngineUnavailable` if any worker fails to start
    #[instrument(skip_all, name = "asc.workers.create", fields(count = count))]
    pub async fn create(
        engine: &dyn MediaEngine,
        count: usize,
        settings: &WorkerSettings,
    ) -> Result<Self, AscError> {
        if count == 0 {
            return Err(AscError::Config(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let worker = engine.create_worker(settings).await.map_err(|e| {
                metrics::record_engine_error("create_worker");
                error!(target: "asc.workers", index, error = %e, "Failed to create media worker");
                AscError::EngineUnavailable(format!("worker {index} failed to start: {e}"))
            })?;
            info!(target: "asc.workers", worker_id = worker.id(), "Media worker started");
            workers.push(worker);
        }

        let notifier = Arc::new(DeathNotifier::default());
        let watchers = workers
            .iter()
            .map(|worker| {
                let worker = Arc::clone(worker);
                let notifier = Arc::clone(&notifier);
                tokio::spawn(async move {
                    let death = worker.died().await;
                    error!(
                        target: "asc.workers",
                        worker_id = death.worker_id,
                        reason = %death.reason,
                        "Media worker died"
                    );
                    notifier.notify(death);
                })
            })
            .collect();

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
            notifier,
            watchers,
        })
    }

    /// Next worker in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns `AscError::Internal` only if the pool is empty, which `create`
    /// never allows.
    pub fn next_worker(&self) -> Result<Arc<dyn MediaWorker>, AscError> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len().max(1);
        let worker = self
            .workers
            .get(index)
            .cloned()
            .ok_or_else(|| AscError::Internal("worker pool is empty".to_string()))?;
        metrics::record_worker_assignment(worker.id());
        Ok(worker)
    }

    /// Register a callback for worker death.
    ///
    /// Deaths that happened before registration are replayed to the new
    /// handler immediately.
    pub fn on_worker_died<F>(&self, handler: F)
    where
        F: Fn(&WorkerDeath) + Send + Sync + 'static,
    {
        self.notifier.register(Arc::new(handler));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ids of the pooled workers, in round-robin order.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id()).collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}
