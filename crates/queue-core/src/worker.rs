//! A worker bound to one `(queue, type)` pair: a single cooperative loop
//! that acquires, selects, claims, runs, and settles jobs of its type. See
//! `spec.md` §4.2.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, Instrument};

use crate::error::{QueueError, Result};
use crate::handle::QueueHandle;
use crate::job::Job;
use crate::state::JobState;
use crate::store::JobFields;
use crate::util::now_ms;

/// A handler invoked once per claimed job. Implement this the way the
/// teacher's `Effect` trait is implemented — one struct per job type,
/// `#[async_trait]`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, job: &mut Job) -> anyhow::Result<()>;
}

/// One handler or store failure observed by a worker, reported up to the
/// owning `Queue` for aggregation on its own `error` surface.
#[derive(Debug, Clone)]
pub struct WorkerError {
    pub job_type: String,
    pub job_id: Option<u64>,
    pub message: String,
}

/// How long a single `Acquire` poll blocks before the worker loop checks
/// back in. The wait is unbounded from the caller's point of view (the
/// loop simply polls again), but bounding each individual call keeps the
/// loop responsive to task cancellation.
const NOTIFY_POLL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Worker<H: Handler> {
    handle: Arc<QueueHandle>,
    job_type: String,
    handler: Arc<H>,
    salvage_once: Arc<DashSet<String>>,
    errors: broadcast::Sender<WorkerError>,
    /// Process-local identifier stamped into a job's log on claim. Not a
    /// first-class persisted field (`spec.md`'s key layout is closed) —
    /// purely a debugging trail.
    worker_id: String,
}

impl<H: Handler> Worker<H> {
    pub(crate) fn new(
        handle: Arc<QueueHandle>,
        job_type: impl Into<String>,
        handler: Arc<H>,
        salvage_once: Arc<DashSet<String>>,
        errors: broadcast::Sender<WorkerError>,
    ) -> Self {
        let job_type = job_type.into();
        let worker_id = format!("{}-{}", job_type, uuid::Uuid::new_v4());
        Self {
            handle,
            job_type,
            handler,
            salvage_once,
            errors,
            worker_id,
        }
    }

    /// Run the loop until the surrounding task is dropped or aborted.
    pub async fn run(self) {
        self.salvage().await;
        loop {
            if let Err(err) = self.tick().await {
                self.report(None, err.to_string());
                error!(job_type = %self.job_type, error = %err, "worker tick failed");
            }
        }
    }

    fn report(&self, job_id: Option<u64>, message: String) {
        let _ = self.errors.send(WorkerError {
            job_type: self.job_type.clone(),
            job_id,
            message,
        });
    }

    /// One-shot scan of `jobs:<type>:active` for jobs abandoned by a dead
    /// worker. Runs exactly once per process lifecycle per type, guarded
    /// by `salvage_once`, which is shared across every `Worker` a `Queue`
    /// spawns for the same type.
    async fn salvage(&self) {
        if !self.salvage_once.insert(self.job_type.clone()) {
            return;
        }
        let abandoned = match self
            .handle
            .store
            .index_type_state_all(&self.job_type, JobState::Active)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                error!(job_type = %self.job_type, error = %err, "salvage scan failed");
                return;
            }
        };
        for id in abandoned {
            match Job::get(self.handle.clone(), id).await {
                Ok(mut job) => match job.inactive().await {
                    Ok(()) => info!(job_id = id, job_type = %self.job_type, "salvaged abandoned job"),
                    Err(err) => error!(job_id = id, error = %err, "salvage requeue failed"),
                },
                Err(QueueError::NotFound { .. }) | Err(QueueError::Corrupt { .. }) => {}
                Err(err) => error!(job_id = id, error = %err, "salvage load failed"),
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        // Acquire: block (bounded per-call) for a sentinel on this type's
        // notification list.
        let popped = self
            .handle
            .store
            .notify_pop(&self.job_type, NOTIFY_POLL_TIMEOUT)
            .await
            .map_err(QueueError::Store)?;
        if !popped {
            return Ok(());
        }

        // Select: the notification list may contain more sentinels than
        // inactive jobs; tolerate a spurious wakeup by returning to
        // Acquire.
        let Some(id) = self
            .handle
            .store
            .index_type_state_lowest(&self.job_type, JobState::Inactive)
            .await
            .map_err(QueueError::Store)?
        else {
            debug!(job_type = %self.job_type, "spurious wakeup, no inactive job");
            return Ok(());
        };

        // Claim
        let mut job = match Job::get(self.handle.clone(), id).await {
            Ok(job) => job,
            Err(QueueError::NotFound { .. }) | Err(QueueError::Corrupt { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };
        job.active().await?;
        job.log("claimed by %s", &[self.worker_id.clone().into()]).await?;

        // Run
        let started = now_ms();
        let span = info_span!("job", id, job_type = %self.job_type);
        let outcome = self.handler.handle(&mut job).instrument(span).await;

        // Settle
        match outcome {
            Ok(()) => {
                let duration = now_ms() - started;
                job.duration = Some(duration);
                self.handle
                    .store
                    .write_job(
                        id,
                        &JobFields {
                            duration: Some(duration),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(QueueError::Store)?;
                self.handle
                    .store
                    .add_work_time(duration)
                    .await
                    .map_err(QueueError::Store)?;
                job.complete().await?;
            }
            Err(err) => {
                self.report(Some(id), err.to_string());
                job.error(err).await?;
                let (remaining, _attempts, _max) = job.attempt().await?;
                if remaining > 0 {
                    job.inactive().await?;
                } else {
                    job.failed().await?;
                }
            }
        }
        Ok(())
    }
}
