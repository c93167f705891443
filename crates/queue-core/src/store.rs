//! The store facade: the single trait every other component in this crate
//! is written against.
//!
//! `spec.md` treats "the store client implementation itself" as an
//! external collaborator; this trait is the seam. `queue-store-redis`
//! implements it against a real Redis-like store using the literal key
//! layout from `spec.md` §6; `queue-testing` implements it in memory for
//! fast, deterministic tests. Every method here corresponds to one or more
//! primitive store commands and is a single suspension point — see
//! `spec.md` §5.
//!
//! All mutations are single-key and independently atomic; this trait makes
//! no claim of multi-key transactionality (see the Non-goals in
//! `spec.md` §1 and the concurrency notes in §5).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::EventMessage;
use crate::state::JobState;

/// The persisted scalar fields of a job record, as written to `job:<id>`.
#[derive(Debug, Clone, Default)]
pub struct JobFields {
    pub job_type: Option<String>,
    pub data: Option<String>,
    pub priority: Option<i32>,
    pub state: Option<String>,
    pub delay: Option<i64>,
    pub attempts: Option<u32>,
    pub max_attempts: Option<u32>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub duration: Option<i64>,
}

/// One entry from the `delayed` set's promotion-ordered scan: the id plus
/// the two fields the promoter needs to compute `due = created_at + delay
/// <= now` without a second round-trip per id.
#[derive(Debug, Clone, Copy)]
pub struct DelayedCandidate {
    pub id: u64,
    pub delay: i64,
    pub created_at: i64,
}

/// The store client facade. One connection per component, per `spec.md`
/// §5 ("each component opens its own connection").
#[async_trait]
pub trait Store: Send + Sync {
    // -- id allocation -----------------------------------------------


    /// Atomically allocate and return the next job id (`INCR ids`).
    async fn next_id(&self) -> anyhow::Result<u64>;

    // -- known types ---------------------------------------------------

    /// Register `job_type` in the set of known type names.
    async fn register_type(&self, job_type: &str) -> anyhow::Result<()>;

    /// All known type names.
    async fn known_types(&self) -> anyhow::Result<Vec<String>>;

    // -- job record ------------------------------------------------------

    /// Merge `fields` into `job:<id>`'s field map. Only `Some` fields are
    /// written; `None` fields are left untouched.
    async fn write_job(&self, id: u64, fields: &JobFields) -> anyhow::Result<()>;

    /// Read the full field map for `id`. `Ok(None)` means the key is
    /// entirely absent (empty record, per `spec.md` §4.1.2).
    async fn read_job(&self, id: u64) -> anyhow::Result<Option<JobFields>>;

    /// Delete `job:<id>` entirely.
    async fn delete_job(&self, id: u64) -> anyhow::Result<()>;

    // -- log -------------------------------------------------------------

    /// Append one log line to `job:<id>:log`.
    async fn push_log(&self, id: u64, line: &str) -> anyhow::Result<()>;

    /// Read the full log for `id`, in append order.
    async fn read_log(&self, id: u64) -> anyhow::Result<Vec<String>>;

    /// Delete `job:<id>:log` entirely.
    async fn delete_log(&self, id: u64) -> anyhow::Result<()>;

    // -- indices -----------------------------------------------------------

    /// Insert `id` into the global `jobs` index, scored by `priority`.
    async fn index_global_add(&self, id: u64, priority: i32) -> anyhow::Result<()>;
    /// Remove `id` from the global `jobs` index.
    async fn index_global_remove(&self, id: u64) -> anyhow::Result<()>;

    /// Insert `id` into `jobs:<state>`, scored by `priority`.
    async fn index_state_add(&self, state: JobState, id: u64, priority: i32) -> anyhow::Result<()>;
    /// Remove `id` from `jobs:<state>`.
    async fn index_state_remove(&self, state: JobState, id: u64) -> anyhow::Result<()>;
    /// List up to `limit` ids from `jobs:<state>`, lowest-priority first,
    /// starting at `offset`.
    async fn index_state_range(
        &self,
        state: JobState,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<u64>>;
    /// Count of ids in `jobs:<state>`.
    async fn index_state_card(&self, state: JobState) -> anyhow::Result<u64>;

    /// Insert `id` into `jobs:<type>:<state>`, scored by `priority`.
    async fn index_type_state_add(
        &self,
        job_type: &str,
        state: JobState,
        id: u64,
        priority: i32,
    ) -> anyhow::Result<()>;
    /// Remove `id` from `jobs:<type>:<state>`.
    async fn index_type_state_remove(
        &self,
        job_type: &str,
        state: JobState,
        id: u64,
    ) -> anyhow::Result<()>;
    /// The single lowest-priority (most urgent) id in `jobs:<type>:<state>`,
    /// if any. Used by the worker's Select step.
    async fn index_type_state_lowest(
        &self,
        job_type: &str,
        state: JobState,
    ) -> anyhow::Result<Option<u64>>;
    /// All ids currently in `jobs:<type>:<state>`, in priority order. Used
    /// by salvage to enumerate abandoned active jobs for one type.
    async fn index_type_state_all(
        &self,
        job_type: &str,
        state: JobState,
    ) -> anyhow::Result<Vec<u64>>;

    // -- delayed promotion source -----------------------------------------

    /// Up to `limit` entries from the `delayed` set, ordered ascending by
    /// each job's stored `delay` attribute (not by priority). See
    /// `spec.md` §4.3 and §9 (the "sort by external attribute" note).
    async fn delayed_candidates(&self, limit: u64) -> anyhow::Result<Vec<DelayedCandidate>>;

    // -- per-type notification list ----------------------------------------

    /// Push one sentinel onto `<type>:jobs`, waking exactly one blocked
    /// pop.
    async fn notify_push(&self, job_type: &str) -> anyhow::Result<()>;

    /// Block (up to `timeout`) for a sentinel on `<type>:jobs`. Returns
    /// `true` if one was popped, `false` on timeout. The unbounded wait
    /// described in `spec.md` §5 is modeled as a long, but finite, timeout
    /// so the worker loop can still observe cancellation between polls.
    async fn notify_pop(
        &self,
        job_type: &str,
        timeout: std::time::Duration,
    ) -> anyhow::Result<bool>;

    // -- counters ------------------------------------------------------

    /// Add `ms` to the cumulative worker-time counter.
    async fn add_work_time(&self, ms: i64) -> anyhow::Result<()>;
    /// Read the cumulative worker-time counter.
    async fn work_time(&self) -> anyhow::Result<i64>;

    // -- settings ------------------------------------------------------

    /// Read one named entry from the free-form settings hash.
    async fn setting(&self, name: &str) -> anyhow::Result<Option<String>>;

    // -- event bus plumbing ----------------------------------------------

    /// Record that `job_id`'s events are owned by `process_id`
    /// (`events:owners` hash entry).
    async fn set_event_owner(&self, job_id: u64, process_id: &str) -> anyhow::Result<()>;
    /// Forget `job_id`'s event ownership.
    async fn clear_event_owner(&self, job_id: u64) -> anyhow::Result<()>;
    /// Look up which process owns `job_id`'s events, if any.
    async fn event_owner(&self, job_id: u64) -> anyhow::Result<Option<String>>;

    /// Publish `message` on the channel named after `process_id`.
    async fn publish(&self, process_id: &str, message: &EventMessage) -> anyhow::Result<()>;
    /// Start listening on the channel named after `process_id`, returning
    /// a receiver that yields every message published to it. The returned
    /// channel never rewinds: a subscriber that starts after a publish
    /// loses it, per `spec.md` §4.4.
    async fn subscribe(&self, process_id: &str) -> anyhow::Result<mpsc::UnboundedReceiver<EventMessage>>;

    // -- search hook -------------------------------------------------------

    /// Hand `data` to the external full-text indexer with `id` as its
    /// document id. Opaque to the core; a no-op implementation is valid.
    async fn index_search(&self, id: u64, data: &serde_json::Value) -> anyhow::Result<()>;
    /// Remove `id` from the external indexer.
    async fn remove_search(&self, id: u64) -> anyhow::Result<()>;
}
