//! Error taxonomy for the queue core.
//!
//! Every fallible operation in this crate returns [`QueueError`]. Store
//! adapters (e.g. `queue-store-redis`) surface their own error types through
//! the `Store` trait's associated `Error` bound, which this crate wraps into
//! `QueueError::Store` via `anyhow`.

use thiserror::Error;

/// Errors produced by the job state machine, worker loop, promoter, and
/// event bus.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Any failure surfaced by the store client. Never swallowed; always
    /// propagated to the caller or re-emitted as an `error` event.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    /// `get(id)` found no record for `id`. The caller has already evicted
    /// `id` from the per-state indices by the time this is returned.
    #[error("job {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: u64,
    },

    /// The record for `id` exists but is missing a `type` field. The
    /// record has already been purged (`remove`) by the time this is
    /// returned.
    #[error("job {id} is corrupt (missing type)")]
    Corrupt {
        /// The id that was found corrupt.
        id: u64,
    },

    /// `data` failed to round-trip through JSON.
    #[error("failed to decode job payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A user-supplied handler returned an error. Recorded into the job's
    /// `error` field and log; retried until attempts are exhausted.
    #[error("handler error: {0}")]
    Handler(anyhow::Error),

    /// `state(s)` was called with a value outside the five valid states.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueueError>;
