//! # queue-core
//!
//! A persistent, priority-aware job queue built over a pluggable
//! key/value + sorted-set store.
//!
//! ## Core concepts
//!
//! - [`Job`] = a unit of work: created, saved, claimed, run, settled.
//! - [`Store`] = the trait every storage backend implements; this crate
//!   ships no concrete backend (see the sibling `queue-store-redis` and
//!   `queue-testing` crates).
//! - [`Worker`] = a cooperative loop claiming jobs of one type and
//!   invoking a [`Handler`].
//! - [`Promoter`] = the periodic sweep moving due `delayed` jobs to
//!   `inactive`.
//! - [`EventBus`] = cross-process delivery of per-job lifecycle events.
//! - [`Queue`] = the facade tying all of the above together.
//!
//! ## Architecture
//!
//! ```text
//! Producer
//!     │  create() + save()
//!     ▼
//! Store (indices: global, per-state, per-(type,state), notification list)
//!     │
//!     ▼  notify_pop (blocking)
//! Worker.tick() ──► Select ──► Claim ──► Run(handler) ──► Settle
//!     │                                                     │
//!     └─────────────────────── state() transitions ─────────┘
//!                                     │
//!                                     ▼
//!                              EventBus.emit()
//!                                     │
//!                                     ▼
//!                          subscribed producer process
//! ```
//!
//! ## Guarantees
//!
//! - At-least-once delivery, not exactly-once.
//! - No strict FIFO across priorities: a constant stream of more-urgent
//!   jobs can starve less-urgent ones by design.
//! - No multi-job transactional atomicity beyond what the store's
//!   single-key commands provide.
//!
//! ## What this is not
//!
//! This crate does not provide an HTTP/JSON admin interface, full-text
//! search indexing (only the hook), the store client's wire protocol, or
//! process supervision. Those are external collaborators.

mod error;
mod events;
mod handle;
pub mod ids;
mod job;
mod priority;
mod promoter;
mod queue;
#[cfg(test)]
mod scenarios;
mod state;
mod store;
mod util;
mod worker;

pub use error::{QueueError, Result};
pub use events::{EventBus, EventKind, EventMessage, Listener};
pub use handle::QueueHandle;
pub use job::Job;
pub use priority::{Priority, PriorityLevel, PriorityParseError};
pub use promoter::{Promoter, DEFAULT_PERIOD};
pub use queue::{Queue, QueueConfig};
pub use state::JobState;
pub use store::{DelayedCandidate, JobFields, Store};
pub use util::LogArg;
pub use worker::{Handler, Worker, WorkerError};

// Re-export commonly used external types, matching the teacher's habit of
// re-exporting `async_trait` so downstream `Handler`/`Store` impls don't
// need their own dependency declaration.
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::*;
    use queue_testing::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn queue() -> Queue {
        let store = Arc::new(MemoryStore::new());
        Queue::create_queue(store, QueueConfig::default())
    }

    #[tokio::test]
    async fn round_trip_save_and_get() {
        let q = queue();
        let mut job = q.create("email", json!({"to": "a"}));
        job.priority("high").unwrap();
        job.save().await.unwrap();
        let id = job.id.unwrap();

        let loaded = q.get(id).await.unwrap();
        assert_eq!(loaded.job_type, "email");
        assert_eq!(loaded.data, json!({"to": "a"}));
        assert_eq!(loaded.priority_value().score(), -10);
        assert_eq!(loaded.state, JobState::Inactive);
    }

    #[tokio::test]
    async fn scenario_one_high_priority_email_job() {
        let q = queue();
        let mut job = q.create("email", json!({"to": "a"}));
        job.priority("high").unwrap();
        job.save().await.unwrap();
        let id = job.id.unwrap();

        assert!(q
            .state(JobState::Inactive, 0, 100)
            .await
            .unwrap()
            .contains(&id));
        assert_eq!(job.priority_value().score(), -10);
    }

    #[tokio::test]
    async fn invariant_attempts_never_exceed_max_after_settle() {
        let q = queue();
        let mut job = q.create("t", json!({}));
        job.attempts(2);
        job.save().await.unwrap();

        let (remaining1, attempts1, max1) = job.attempt().await.unwrap();
        assert_eq!((remaining1, attempts1, max1), (1, 1, 2));
        let (remaining2, attempts2, max2) = job.attempt().await.unwrap();
        assert_eq!((remaining2, attempts2, max2), (0, 2, 2));
        assert!(job.attempts <= job.max_attempts);
    }

    #[tokio::test]
    async fn remove_clears_every_index() {
        let q = queue();
        let mut job = q.create("t", json!({}));
        job.save().await.unwrap();
        let id = job.id.unwrap();

        job.remove().await.unwrap();

        assert!(matches!(
            q.get(id).await,
            Err(QueueError::NotFound { id: got }) if got == id
        ));
        assert!(!q
            .state(JobState::Inactive, 0, 100)
            .await
            .unwrap()
            .contains(&id));
    }
}
