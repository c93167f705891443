//! The queue facade: construction, aggregate counters, worker pool
//! spawning, and salvage. See `spec.md` §4.5.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{QueueError, Result};
use crate::events::{EventBus, EventMessage};
use crate::handle::QueueHandle;
use crate::job::Job;
use crate::promoter::{Promoter, DEFAULT_PERIOD};
use crate::state::JobState;
use crate::store::Store;
use crate::worker::{Handler, Worker, WorkerError};

/// Construction-time settings. There is no external config-file crate
/// here, matching the teacher's preference for plain `Default`-backed
/// builder structs (`RuntimeBuilder`/`EngineBuilder`) over a config
/// layer.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// This process's identifier, used as the event-bus channel name.
    /// Defaults to a random UUID.
    pub process_id: Option<String>,
    /// Default promoter tick period for [`Queue::promote`].
    pub promoter_period: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            process_id: None,
            promoter_period: DEFAULT_PERIOD,
        }
    }
}

struct QueueInner {
    salvage_once: Arc<DashSet<String>>,
    errors: broadcast::Sender<WorkerError>,
    promoter_period: Duration,
}

/// The entry point: construct jobs, spawn worker pools, start the
/// promoter, and query aggregate state. Cheaply `Clone`-able — every
/// clone shares the same underlying store connection factory and event
/// bus, the way the teacher's `Engine`/`EngineHandle` split lets many
/// handles share one runtime.
#[derive(Clone)]
pub struct Queue {
    handle: Arc<QueueHandle>,
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Construct a queue bound to `store`. Not a global singleton: each
    /// call returns an independent queue sharing nothing but the
    /// underlying store, matching the spec's "idempotent factory
    /// returning a singleton-per-process queue" with an explicit,
    /// testable constructor in place of ambient global state.
    pub fn create_queue(store: Arc<dyn Store>, config: QueueConfig) -> Queue {
        let process_id = config
            .process_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = QueueHandle::new(store, process_id);
        let (errors, _rx) = broadcast::channel(256);
        Queue {
            handle,
            inner: Arc::new(QueueInner {
                salvage_once: Arc::new(DashSet::new()),
                errors,
                promoter_period: config.promoter_period,
            }),
        }
    }

    /// Construct a job (not yet saved).
    pub fn create(&self, job_type: impl Into<String>, data: Value) -> Job {
        Job::create(self.handle.clone(), job_type, data)
    }

    /// Spawn `n` (default 1 if `n == 0`) workers on `job_type`, plus one
    /// salvage pass shared across them. Returns the spawned tasks' join
    /// handles so the caller can await graceful shutdown.
    pub async fn process<H: Handler>(
        &self,
        job_type: impl Into<String>,
        n: usize,
        handler: H,
    ) -> Vec<JoinHandle<()>> {
        let job_type = job_type.into();
        let handler = Arc::new(handler);
        let n = n.max(1);
        let mut spawned = Vec::with_capacity(n);
        for _ in 0..n {
            let worker = Worker::new(
                self.handle.clone(),
                job_type.clone(),
                handler.clone(),
                self.inner.salvage_once.clone(),
                self.inner.errors.clone(),
            );
            spawned.push(tokio::spawn(worker.run()));
        }
        spawned
    }

    /// Start the promoter with an explicit period. Returns the task's
    /// join handle.
    pub fn promote_every(&self, period: Duration) -> JoinHandle<()> {
        let promoter = Promoter::new(self.handle.clone(), period);
        tokio::spawn(promoter.run())
    }

    /// Start the promoter with the period given to [`QueueConfig`] at
    /// construction (default 5s).
    pub fn promote(&self) -> JoinHandle<()> {
        self.promote_every(self.inner.promoter_period)
    }

    /// Every worker and store error observed by any worker this queue
    /// spawned, aggregated onto one stream the way the teacher's `Engine`
    /// re-emits effect errors on itself.
    pub fn errors(&self) -> broadcast::Receiver<WorkerError> {
        self.inner.errors.subscribe()
    }

    /// Every lifecycle event this process's event-bus channel has
    /// received, for listeners interested in `job <event>` regardless of
    /// which job emitted it.
    pub fn events(&self) -> broadcast::Receiver<EventMessage> {
        self.handle.bus.subscribe_all()
    }

    /// The underlying event bus, for attaching per-job listeners via
    /// [`Job::on`](crate::job::Job::on) or opening the subscribe channel
    /// eagerly.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.handle.bus
    }

    /// All known type names.
    pub async fn types(&self) -> Result<Vec<String>> {
        self.handle.store.known_types().await.map_err(QueueError::Store)
    }

    /// Ids in `state`, lowest-priority first, starting at `offset`.
    pub async fn state(&self, state: JobState, offset: u64, limit: u64) -> Result<Vec<u64>> {
        self.handle
            .store
            .index_state_range(state, offset, limit)
            .await
            .map_err(QueueError::Store)
    }

    /// Count of ids in `state`.
    pub async fn card(&self, state: JobState) -> Result<u64> {
        self.handle
            .store
            .index_state_card(state)
            .await
            .map_err(QueueError::Store)
    }

    pub async fn inactive_count(&self) -> Result<u64> {
        self.card(JobState::Inactive).await
    }
    pub async fn active_count(&self) -> Result<u64> {
        self.card(JobState::Active).await
    }
    pub async fn complete_count(&self) -> Result<u64> {
        self.card(JobState::Complete).await
    }
    pub async fn failed_count(&self) -> Result<u64> {
        self.card(JobState::Failed).await
    }
    pub async fn delayed_count(&self) -> Result<u64> {
        self.card(JobState::Delayed).await
    }

    /// Cumulative worker-time, in milliseconds.
    pub async fn work_time(&self) -> Result<i64> {
        self.handle.store.work_time().await.map_err(QueueError::Store)
    }

    /// Read one named settings entry.
    pub async fn setting(&self, name: &str) -> Result<Option<String>> {
        self.handle.store.setting(name).await.map_err(QueueError::Store)
    }

    /// Load a job by id.
    pub async fn get(&self, id: u64) -> Result<Job> {
        Job::get(self.handle.clone(), id).await
    }
}
