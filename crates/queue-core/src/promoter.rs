//! Periodic sweep moving due delayed jobs to `inactive`. See `spec.md`
//! §4.3.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::QueueError;
use crate::handle::QueueHandle;
use crate::job::Job;
use crate::util::now_ms;

/// How many delayed candidates are inspected per tick. Bounds the scan
/// cost; over multiple ticks every due job is still promoted.
const BATCH_SIZE: u64 = 20;

/// The default tick period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

pub struct Promoter {
    handle: Arc<QueueHandle>,
    period: Duration,
}

impl Promoter {
    pub fn new(handle: Arc<QueueHandle>, period: Duration) -> Self {
        Self { handle, period }
    }

    /// Run the sweep forever, once per `period`, until the surrounding
    /// task is dropped or aborted.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One sweep. A store error or a single failed `get` skips the rest
    /// of this tick; the next tick retries, including entries this tick
    /// didn't reach.
    async fn tick(&self) {
        let candidates = match self.handle.store.delayed_candidates(BATCH_SIZE).await {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "promoter scan failed");
                return;
            }
        };

        let now = now_ms();
        for candidate in candidates {
            let due = candidate.created_at + candidate.delay <= now;
            if !due {
                continue;
            }

            let mut job = match Job::get(self.handle.clone(), candidate.id).await {
                Ok(job) => job,
                Err(QueueError::NotFound { .. }) | Err(QueueError::Corrupt { .. }) => {
                    debug!(id = candidate.id, "promoter candidate already gone; skipping tick");
                    return;
                }
                Err(err) => {
                    error!(id = candidate.id, error = %err, "promoter get failed; skipping tick");
                    return;
                }
            };

            // Promoting an already-inactive job is a no-op transition
            // that re-places it identically, so this is safe to retry.
            if let Err(err) = job.promote().await {
                error!(id = candidate.id, error = %err, "promoter transition failed; skipping tick");
                return;
            }
        }
    }
}
