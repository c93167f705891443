//! The job record: in-memory representation, persistence, state
//! transitions, logging, attempts, and progress. See `spec.md` §4.1.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{QueueError, Result};
use crate::events::{EventKind, Listener};
use crate::handle::QueueHandle;
use crate::priority::{Priority, PriorityLevel};
use crate::state::JobState;
use crate::store::JobFields;
use crate::util::{format_log, now_ms, LogArg};

/// A job: the unit of work tracked by the queue.
///
/// Constructed in memory with [`Job::create`] (priority `normal`, state
/// `inactive`), persisted with [`Job::save`], mutated by workers and
/// administrative calls, and destroyed with [`Job::remove`].
pub struct Job {
    handle: Arc<QueueHandle>,
    pub id: Option<u64>,
    pub job_type: String,
    pub data: Value,
    pub priority: Priority,
    pub state: JobState,
    pub delay: Option<i64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub error: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub failed_at: Option<i64>,
    pub duration: Option<i64>,
    pub log: Vec<String>,
}

impl Job {
    /// Construct a job in memory. Not yet persisted — call [`Job::save`]
    /// to allocate an id and write it to the store.
    pub fn create(handle: Arc<QueueHandle>, job_type: impl Into<String>, data: Value) -> Self {
        let now = now_ms();
        Self {
            handle,
            id: None,
            job_type: job_type.into(),
            data,
            priority: Priority::NORMAL,
            state: JobState::Inactive,
            delay: None,
            attempts: 0,
            max_attempts: 1,
            progress: 0,
            error: String::new(),
            created_at: now,
            updated_at: now,
            failed_at: None,
            duration: None,
            log: Vec::new(),
        }
    }

    /// Set the job's priority. Named levels (`critical`, `high`, `medium`,
    /// `normal`, `low`) resolve via the fixed map; unrecognized names are
    /// interpreted as numeric (`spec.md` §4.1).
    pub fn priority(&mut self, level: impl Into<PriorityLevel>) -> std::result::Result<&mut Self, QueueError> {
        let resolved = level
            .into()
            .resolve()
            .map_err(|e| QueueError::InvalidState(e.to_string()))?;
        self.priority = resolved;
        Ok(self)
    }

    /// The job's current priority.
    pub fn priority_value(&self) -> Priority {
        self.priority
    }

    /// Set the delay. A positive value forces the in-memory state to
    /// `delayed`; the transition only takes effect in the store once
    /// [`Job::save`] is called.
    pub fn delay(&mut self, ms: i64) -> &mut Self {
        self.delay = Some(ms);
        if ms > 0 {
            self.state = JobState::Delayed;
        }
        self
    }

    /// Set `max_attempts`.
    pub fn attempts(&mut self, n: u32) -> &mut Self {
        self.max_attempts = n;
        self
    }

    fn require_id(&self) -> std::result::Result<u64, QueueError> {
        self.id
            .ok_or_else(|| QueueError::InvalidState("job has not been saved yet".to_string()))
    }

    /// Recompute progress as `min(100, floor(done/total*100))`, persist
    /// it, and emit a `progress` event with the new percent.
    pub async fn progress(&mut self, done: u64, total: u64) -> Result<()> {
        let id = self.require_id()?;
        let percent = if total == 0 {
            0
        } else {
            ((done as f64 / total as f64) * 100.0).floor().min(100.0) as u8
        };
        self.progress = percent;
        self.updated_at = now_ms();
        self.handle
            .store
            .write_job(
                id,
                &JobFields {
                    progress: Some(self.progress),
                    updated_at: Some(self.updated_at),
                    ..Default::default()
                },
            )
            .await
            .map_err(QueueError::Store)?;
        self.handle
            .bus
            .emit(id, EventKind::Progress, json!({ "percent": percent }))
            .await?;
        Ok(())
    }

    /// Format `fmt` with `args` (`%s`/`%d` specifiers), append to the log,
    /// persist the line, and bump `updated_at`.
    pub async fn log(&mut self, fmt: &str, args: &[LogArg]) -> Result<()> {
        let line = format_log(fmt, args);
        self.log_raw(line).await
    }

    /// Append a pre-rendered line to the log verbatim (no `%s`/`%d`
    /// substitution), persist it, and bump `updated_at`.
    async fn log_raw(&mut self, line: String) -> Result<()> {
        let id = self.require_id()?;
        self.log.push(line.clone());
        self.updated_at = now_ms();
        self.handle
            .store
            .push_log(id, &line)
            .await
            .map_err(QueueError::Store)?;
        self.handle
            .store
            .write_job(
                id,
                &JobFields {
                    updated_at: Some(self.updated_at),
                    ..Default::default()
                },
            )
            .await
            .map_err(QueueError::Store)?;
        Ok(())
    }

    /// Record `err`'s text (or its full multi-line rendering, if any) into
    /// `error`, append its first line to the log verbatim, and set
    /// `failed_at`.
    pub async fn error(&mut self, err: impl std::fmt::Display) -> Result<()> {
        let id = self.require_id()?;
        let rendered = err.to_string();
        self.error = rendered.clone();
        self.failed_at = Some(now_ms());
        self.handle
            .store
            .write_job(
                id,
                &JobFields {
                    error: Some(self.error.clone()),
                    failed_at: self.failed_at,
                    ..Default::default()
                },
            )
            .await
            .map_err(QueueError::Store)?;
        let first_line = rendered.lines().next().unwrap_or("").to_string();
        self.log_raw(first_line).await?;
        self.handle.bus.emit(id, EventKind::Error, json!({})).await?;
        Ok(())
    }

    /// The single state-transition primitive. See `spec.md` §4.1.1.
    ///
    /// 1. De-index `id` from the global, current-state, and current
    ///    `(type, state)` sets.
    /// 2. Update the in-memory and persisted `state`.
    /// 3. Re-index `id` into the global, new-state, and new `(type,
    ///    state)` sets, scored by the current priority.
    /// 4. If `new_state == inactive`, push a notification sentinel.
    /// 5. Bump `updated_at`.
    pub async fn state(&mut self, new_state: JobState) -> Result<()> {
        let id = self.require_id()?;
        let from_state = self.state;
        let priority = self.priority.score();
        debug!(job_id = id, %from_state, to_state = %new_state, "state transition");

        let store = &self.handle.store;
        store
            .index_global_remove(id)
            .await
            .map_err(QueueError::Store)?;
        store
            .index_state_remove(from_state, id)
            .await
            .map_err(QueueError::Store)?;
        store
            .index_type_state_remove(&self.job_type, from_state, id)
            .await
            .map_err(QueueError::Store)?;

        self.state = new_state;
        self.updated_at = now_ms();
        store
            .write_job(
                id,
                &JobFields {
                    state: Some(new_state.as_str().to_string()),
                    updated_at: Some(self.updated_at),
                    ..Default::default()
                },
            )
            .await
            .map_err(QueueError::Store)?;

        store
            .index_global_add(id, priority)
            .await
            .map_err(QueueError::Store)?;
        store
            .index_state_add(new_state, id, priority)
            .await
            .map_err(QueueError::Store)?;
        store
            .index_type_state_add(&self.job_type, new_state, id, priority)
            .await
            .map_err(QueueError::Store)?;

        if new_state == JobState::Inactive {
            store
                .notify_push(&self.job_type)
                .await
                .map_err(QueueError::Store)?;
        }
        Ok(())
    }

    /// Force `progress` to 100, transition to `complete`, and emit
    /// `complete`. Invariant 4 (`spec.md` §3: `progress == 100` whenever
    /// `state == complete`) must hold even for a handler that never calls
    /// [`Job::progress`] itself, so this forces and persists it first,
    /// matching kue's `Job.complete()`.
    pub async fn complete(&mut self) -> Result<()> {
        self.progress(100, 100).await?;
        self.state(JobState::Complete).await?;
        let id = self.require_id()?;
        self.handle.bus.emit(id, EventKind::Complete, json!({})).await?;
        Ok(())
    }

    /// Transition to `failed` and emit `failed`.
    pub async fn failed(&mut self) -> Result<()> {
        self.state(JobState::Failed).await?;
        let id = self.require_id()?;
        self.handle.bus.emit(id, EventKind::Failed, json!({})).await?;
        Ok(())
    }

    /// Transition to `inactive` (re-queue). Does not itself emit an event
    /// — a retry requeue is not one of the named lifecycle events in
    /// `spec.md` §4.4; only the promoter's `inactive` transition is
    /// (`promotion`), via [`Job::promote`].
    pub async fn inactive(&mut self) -> Result<()> {
        self.state(JobState::Inactive).await
    }

    /// Transition to `active`, recording the in-memory start, and emit
    /// `start`.
    pub async fn active(&mut self) -> Result<()> {
        self.state(JobState::Active).await?;
        let id = self.require_id()?;
        self.handle.bus.emit(id, EventKind::Start, json!({})).await?;
        Ok(())
    }

    /// Transition `delayed -> inactive` because the promoter determined
    /// the job is due, and emit `promotion`.
    pub async fn promote(&mut self) -> Result<()> {
        self.state(JobState::Inactive).await?;
        let id = self.require_id()?;
        self.handle.bus.emit(id, EventKind::Promotion, json!({})).await?;
        Ok(())
    }

    /// Persist the job. Allocates an id and performs initial persistence,
    /// index insertion, and event subscription on first save; delegates
    /// to [`Job::update`] otherwise.
    pub async fn save(&mut self) -> Result<()> {
        if self.id.is_some() {
            return self.update().await;
        }

        let store = &self.handle.store;
        let id = store.next_id().await.map_err(QueueError::Store)?;
        self.id = Some(id);
        self.created_at = now_ms();
        self.updated_at = self.created_at;

        let data_json = serde_json::to_string(&self.data)?;
        store
            .write_job(
                id,
                &JobFields {
                    job_type: Some(self.job_type.clone()),
                    data: Some(data_json),
                    priority: Some(self.priority.score()),
                    state: Some(self.state.as_str().to_string()),
                    delay: self.delay,
                    attempts: Some(self.attempts),
                    max_attempts: Some(self.max_attempts),
                    progress: Some(self.progress),
                    error: Some(self.error.clone()),
                    created_at: Some(self.created_at),
                    updated_at: Some(self.updated_at),
                    failed_at: self.failed_at,
                    duration: self.duration,
                },
            )
            .await
            .map_err(QueueError::Store)?;

        store
            .register_type(&self.job_type)
            .await
            .map_err(QueueError::Store)?;

        let priority = self.priority.score();
        store
            .index_global_add(id, priority)
            .await
            .map_err(QueueError::Store)?;
        store
            .index_state_add(self.state, id, priority)
            .await
            .map_err(QueueError::Store)?;
        store
            .index_type_state_add(&self.job_type, self.state, id, priority)
            .await
            .map_err(QueueError::Store)?;
        if self.state == JobState::Inactive {
            store
                .notify_push(&self.job_type)
                .await
                .map_err(QueueError::Store)?;
        }

        self.handle.bus.add(id).await?;
        self.handle.bus.emit(id, EventKind::Enqueue, json!({})).await?;
        Ok(())
    }

    /// Serialize `data`, persist scalar fields, reapply the current state
    /// (re-indexing under the current priority), and hand the JSON to the
    /// search indexer.
    pub async fn update(&mut self) -> Result<()> {
        let id = self.require_id()?;
        let data_json = serde_json::to_string(&self.data)?;

        self.updated_at = now_ms();
        self.handle
            .store
            .write_job(
                id,
                &JobFields {
                    job_type: Some(self.job_type.clone()),
                    data: Some(data_json),
                    priority: Some(self.priority.score()),
                    delay: self.delay,
                    attempts: Some(self.attempts),
                    max_attempts: Some(self.max_attempts),
                    progress: Some(self.progress),
                    error: Some(self.error.clone()),
                    updated_at: Some(self.updated_at),
                    failed_at: self.failed_at,
                    duration: self.duration,
                    ..Default::default()
                },
            )
            .await
            .map_err(QueueError::Store)?;

        // Reapply state: re-index at the (possibly new) priority.
        let state = self.state;
        self.state(state).await?;

        self.handle
            .store
            .index_search(id, &self.data)
            .await
            .map_err(QueueError::Store)?;
        Ok(())
    }

    /// Remove the job from every index, delete its log, its search entry,
    /// its record, and its event-bus mapping, and emit `remove`.
    pub async fn remove(&mut self) -> Result<()> {
        let id = self.require_id()?;
        let store = &self.handle.store;

        // Cleanup is best-effort per `spec.md` §7; errors here do not
        // prevent the rest of removal from proceeding.
        let _ = store.index_global_remove(id).await;
        let _ = store.index_state_remove(self.state, id).await;
        let _ = store
            .index_type_state_remove(&self.job_type, self.state, id)
            .await;
        let _ = store.delete_log(id).await;
        let _ = store.remove_search(id).await;
        store.delete_job(id).await.map_err(QueueError::Store)?;

        self.handle.bus.emit(id, EventKind::Remove, json!({})).await?;
        self.handle.bus.remove(id).await?;
        Ok(())
    }

    /// Atomically increment the attempt counter and report remaining
    /// attempts. Sets `max_attempts = 1` if it was never set (already the
    /// in-memory default).
    pub async fn attempt(&mut self) -> Result<(i64, u32, u32)> {
        let id = self.require_id()?;
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        self.attempts += 1;
        self.handle
            .store
            .write_job(
                id,
                &JobFields {
                    attempts: Some(self.attempts),
                    max_attempts: Some(self.max_attempts),
                    ..Default::default()
                },
            )
            .await
            .map_err(QueueError::Store)?;
        let remaining = self.max_attempts as i64 - self.attempts as i64;
        Ok((remaining, self.attempts, self.max_attempts))
    }

    /// Attach a local listener to this job's events. Implicitly opens
    /// this process's subscribe channel.
    pub async fn on(&self, listener: Listener) -> Result<()> {
        let id = self.require_id()?;
        self.handle.bus.listen(id, listener).await
    }

    /// Load a job by id. Cleans up stale index entries on `NotFound` and
    /// purges corrupt records, per `spec.md` §4.1.2.
    pub async fn get(handle: Arc<QueueHandle>, id: u64) -> Result<Job> {
        let fields = handle
            .store
            .read_job(id)
            .await
            .map_err(QueueError::Store)?;

        let Some(fields) = fields else {
            evict_from_all_states(&handle, id).await;
            return Err(QueueError::NotFound { id });
        };

        let Some(job_type) = fields.job_type.clone() else {
            evict_from_all_states(&handle, id).await;
            let mut stub = Job {
                handle: handle.clone(),
                id: Some(id),
                job_type: String::new(),
                data: Value::Null,
                priority: Priority::NORMAL,
                state: JobState::Inactive,
                delay: None,
                attempts: 0,
                max_attempts: 1,
                progress: 0,
                error: String::new(),
                created_at: 0,
                updated_at: 0,
                failed_at: None,
                duration: None,
                log: Vec::new(),
            };
            let _ = stub.remove().await;
            return Err(QueueError::Corrupt { id });
        };

        let data = match &fields.data {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Null,
        };
        let priority = Priority(fields.priority.unwrap_or(0));
        let state = fields
            .state
            .as_deref()
            .map(|s| s.parse::<JobState>())
            .transpose()?
            .unwrap_or(JobState::Inactive);
        let log = handle.store.read_log(id).await.map_err(QueueError::Store)?;

        Ok(Job {
            handle,
            id: Some(id),
            job_type,
            data,
            priority,
            state,
            delay: fields.delay,
            attempts: fields.attempts.unwrap_or(0),
            max_attempts: fields.max_attempts.unwrap_or(1),
            progress: fields.progress.unwrap_or(0),
            error: fields.error.unwrap_or_default(),
            created_at: fields.created_at.unwrap_or(0),
            updated_at: fields.updated_at.unwrap_or(0),
            failed_at: fields.failed_at,
            duration: fields.duration,
            log,
        })
    }
}

/// Invariant 2 (`spec.md` §3): if the record is missing but the indices
/// reference the id, the indices are the inconsistent party. Evict `id`
/// from every per-state set.
async fn evict_from_all_states(handle: &QueueHandle, id: u64) {
    for state in JobState::ALL {
        let _ = handle.store.index_state_remove(state, id).await;
    }
    let _ = handle.store.index_global_remove(id).await;
}
