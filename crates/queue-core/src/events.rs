//! Cross-process event bus.
//!
//! Translates job lifecycle transitions into per-job callbacks on whichever
//! producer process subscribed to that job. See `spec.md` §4.4.
//!
//! Two concerns that the distilled spec conflates are split here per the
//! open question in §9: opening this process's subscribe channel
//! ([`EventBus::ensure_channel_open`], idempotent, lazy) and attaching an
//! in-process listener to one job's events ([`EventBus::add`] /
//! [`Job::on`](crate::job::Job::on)).

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::Store;

/// The lifecycle events raised by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Enqueue,
    Start,
    Promotion,
    Progress,
    Complete,
    Failed,
    Error,
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Enqueue => "enqueue",
            EventKind::Start => "start",
            EventKind::Promotion => "promotion",
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
            EventKind::Failed => "failed",
            EventKind::Error => "error",
            EventKind::Remove => "remove",
        };
        write!(f, "{s}")
    }
}

/// The message shape carried on a process's subscribe channel: `{ id,
/// event, args }` (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: u64,
    pub event: EventKind,
    pub args: Value,
}

/// A local, in-process listener attached to a single job's events.
pub type Listener = Arc<dyn Fn(&EventMessage) + Send + Sync>;

/// The cross-process event bus.
///
/// `add`/`remove` maintain the `jobId -> ownerProcess` mapping in the
/// store (the `events:owners` hash, see `SPEC_FULL.md` §6). `emit` looks
/// up the owner and publishes to its channel. `subscribe` starts this
/// process's own channel listener, idempotently, and dispatches incoming
/// messages to locally registered listeners.
pub struct EventBus {
    store: Arc<dyn Store>,
    process_id: String,
    /// Local listeners for jobs this process instantiated, keyed by job id.
    listeners: Arc<DashMap<u64, Vec<Listener>>>,
    /// Guards against opening the subscribe channel more than once.
    channel_open: std::sync::atomic::AtomicBool,
    /// Broadcast of every message this process receives on its channel,
    /// fanned out to `subscribe_all` callers (e.g. `Queue`'s `job <event>`
    /// aggregation).
    broadcast: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new(store: Arc<dyn Store>, process_id: impl Into<String>) -> Self {
        let (broadcast, _rx) = broadcast::channel(1024);
        Self {
            store,
            process_id: process_id.into(),
            listeners: Arc::new(DashMap::new()),
            channel_open: std::sync::atomic::AtomicBool::new(false),
            broadcast,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Register that this process owns `job_id`'s events.
    pub async fn add(&self, job_id: u64) -> Result<()> {
        self.store.set_event_owner(job_id, &self.process_id).await?;
        Ok(())
    }

    /// Forget that this process owns `job_id`'s events.
    pub async fn remove(&self, job_id: u64) -> Result<()> {
        self.store.clear_event_owner(job_id).await?;
        self.listeners.remove(&job_id);
        Ok(())
    }

    /// Attach a local callback to `job_id`'s events. Implicitly opens this
    /// process's channel the first time any listener is attached.
    pub async fn listen(&self, job_id: u64, listener: Listener) -> Result<()> {
        self.ensure_channel_open().await?;
        self.listeners.entry(job_id).or_default().push(listener);
        Ok(())
    }

    /// Publish `event` for `job_id` to whichever process owns it.
    pub async fn emit(&self, job_id: u64, event: EventKind, args: Value) -> Result<()> {
        let owner = self.store.event_owner(job_id).await?;
        let Some(owner) = owner else {
            debug!(job_id, %event, "emit with no registered owner; dropping");
            return Ok(());
        };
        let message = EventMessage {
            id: job_id,
            event,
            args,
        };
        self.store.publish(&owner, &message).await?;
        Ok(())
    }

    /// Idempotently start listening on this process's own channel. Safe to
    /// call repeatedly; only the first call does any work.
    pub async fn ensure_channel_open(&self) -> Result<()> {
        if self
            .channel_open
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Ok(());
        }
        let mut incoming = self.store.subscribe(&self.process_id).await?;
        let listeners = self.listeners.clone();
        let broadcast = self.broadcast.clone();
        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                if let Some(subs) = listeners.get(&message.id) {
                    for listener in subs.iter() {
                        listener(&message);
                    }
                }
                // Best-effort fanout; a lagging or absent receiver never
                // blocks delivery to per-job listeners.
                let _ = broadcast.send(message);
            }
            warn!("event channel closed");
        });
        Ok(())
    }

    /// Subscribe to every message this process receives, regardless of
    /// which job it targets. Used by `Queue` to aggregate `job <event>`.
    pub fn subscribe_all(&self) -> broadcast::Receiver<EventMessage> {
        self.broadcast.subscribe()
    }
}
