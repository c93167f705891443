//! In-memory [`queue_core::Store`] implementation for fast, deterministic
//! tests, plus a couple of small fixtures. Mirrors the teacher's
//! `seesaw-testing` crate's purpose ("testing utilities for Seesaw
//! framework"); unlike the teacher, this crate carries real code rather
//! than a placeholder, since nothing downstream can exercise `queue-core`
//! without a concrete `Store`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use queue_core::{DelayedCandidate, EventMessage, JobFields, JobState, Store};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// One in-process, `Arc`-shareable store. Every index is kept as a plain
/// `BTreeSet<(priority, id)>` so iteration order matches the "lowest
/// priority value first" rule the real store gets from a sorted set.
pub struct MemoryStore {
    next_id: AtomicU64,
    types: DashMap<String, ()>,
    jobs: DashMap<u64, JobFields>,
    logs: DashMap<u64, Vec<String>>,
    global: Mutex<BTreeSet<(i32, u64)>>,
    by_state: Mutex<HashMap<JobState, BTreeSet<(i32, u64)>>>,
    by_type_state: Mutex<HashMap<(String, JobState), BTreeSet<(i32, u64)>>>,
    notify: DashMap<String, mpsc::UnboundedSender<()>>,
    notify_rx: DashMap<String, Arc<AsyncMutex<mpsc::UnboundedReceiver<()>>>>,
    work_time: AtomicI64,
    settings: DashMap<String, String>,
    event_owners: DashMap<u64, String>,
    channels: DashMap<String, Vec<mpsc::UnboundedSender<EventMessage>>>,
    search_index: DashMap<u64, serde_json::Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            types: DashMap::new(),
            jobs: DashMap::new(),
            logs: DashMap::new(),
            global: Mutex::new(BTreeSet::new()),
            by_state: Mutex::new(HashMap::new()),
            by_type_state: Mutex::new(HashMap::new()),
            notify: DashMap::new(),
            notify_rx: DashMap::new(),
            work_time: AtomicI64::new(0),
            settings: DashMap::new(),
            event_owners: DashMap::new(),
            channels: DashMap::new(),
            search_index: DashMap::new(),
        }
    }

    /// Pre-seed a settings entry, for tests asserting on `Queue::setting`.
    pub fn set_setting(&self, name: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(name.into(), value.into());
    }

    /// The document last handed to `index_search` for `id`, if any and if
    /// it hasn't since been removed. Lets tests assert the search hook
    /// fired without depending on a real indexer.
    pub fn indexed_document(&self, id: u64) -> Option<serde_json::Value> {
        self.search_index.get(&id).map(|v| v.clone())
    }

    fn notify_channel(&self, job_type: &str) -> mpsc::UnboundedSender<()> {
        if let Some(tx) = self.notify.get(job_type) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify.insert(job_type.to_string(), tx.clone());
        self.notify_rx
            .insert(job_type.to_string(), Arc::new(AsyncMutex::new(rx)));
        tx
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn next_id(&self) -> anyhow::Result<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn register_type(&self, job_type: &str) -> anyhow::Result<()> {
        self.types.insert(job_type.to_string(), ());
        Ok(())
    }

    async fn known_types(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.types.iter().map(|e| e.key().clone()).collect())
    }

    async fn write_job(&self, id: u64, fields: &JobFields) -> anyhow::Result<()> {
        let mut entry = self.jobs.entry(id).or_default();
        macro_rules! merge {
            ($field:ident) => {
                if fields.$field.is_some() {
                    entry.$field = fields.$field.clone();
                }
            };
        }
        merge!(job_type);
        merge!(data);
        merge!(priority);
        merge!(state);
        merge!(delay);
        merge!(attempts);
        merge!(max_attempts);
        merge!(progress);
        merge!(error);
        merge!(created_at);
        merge!(updated_at);
        merge!(failed_at);
        merge!(duration);
        Ok(())
    }

    async fn read_job(&self, id: u64) -> anyhow::Result<Option<JobFields>> {
        Ok(self.jobs.get(&id).map(|e| e.clone()))
    }

    async fn delete_job(&self, id: u64) -> anyhow::Result<()> {
        self.jobs.remove(&id);
        Ok(())
    }

    async fn push_log(&self, id: u64, line: &str) -> anyhow::Result<()> {
        self.logs.entry(id).or_default().push(line.to_string());
        Ok(())
    }

    async fn read_log(&self, id: u64) -> anyhow::Result<Vec<String>> {
        Ok(self.logs.get(&id).map(|e| e.clone()).unwrap_or_default())
    }

    async fn delete_log(&self, id: u64) -> anyhow::Result<()> {
        self.logs.remove(&id);
        Ok(())
    }

    async fn index_global_add(&self, id: u64, priority: i32) -> anyhow::Result<()> {
        self.global.lock().unwrap().insert((priority, id));
        Ok(())
    }

    async fn index_global_remove(&self, id: u64) -> anyhow::Result<()> {
        self.global.lock().unwrap().retain(|(_, i)| *i != id);
        Ok(())
    }

    async fn index_state_add(&self, state: JobState, id: u64, priority: i32) -> anyhow::Result<()> {
        self.by_state
            .lock()
            .unwrap()
            .entry(state)
            .or_default()
            .insert((priority, id));
        Ok(())
    }

    async fn index_state_remove(&self, state: JobState, id: u64) -> anyhow::Result<()> {
        if let Some(set) = self.by_state.lock().unwrap().get_mut(&state) {
            set.retain(|(_, i)| *i != id);
        }
        Ok(())
    }

    async fn index_state_range(
        &self,
        state: JobState,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<u64>> {
        let guard = self.by_state.lock().unwrap();
        let Some(set) = guard.get(&state) else {
            return Ok(Vec::new());
        };
        Ok(set
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn index_state_card(&self, state: JobState) -> anyhow::Result<u64> {
        Ok(self
            .by_state
            .lock()
            .unwrap()
            .get(&state)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn index_type_state_add(
        &self,
        job_type: &str,
        state: JobState,
        id: u64,
        priority: i32,
    ) -> anyhow::Result<()> {
        self.by_type_state
            .lock()
            .unwrap()
            .entry((job_type.to_string(), state))
            .or_default()
            .insert((priority, id));
        Ok(())
    }

    async fn index_type_state_remove(
        &self,
        job_type: &str,
        state: JobState,
        id: u64,
    ) -> anyhow::Result<()> {
        if let Some(set) = self
            .by_type_state
            .lock()
            .unwrap()
            .get_mut(&(job_type.to_string(), state))
        {
            set.retain(|(_, i)| *i != id);
        }
        Ok(())
    }

    async fn index_type_state_lowest(
        &self,
        job_type: &str,
        state: JobState,
    ) -> anyhow::Result<Option<u64>> {
        Ok(self
            .by_type_state
            .lock()
            .unwrap()
            .get(&(job_type.to_string(), state))
            .and_then(|s| s.iter().next())
            .map(|(_, id)| *id))
    }

    async fn index_type_state_all(
        &self,
        job_type: &str,
        state: JobState,
    ) -> anyhow::Result<Vec<u64>> {
        Ok(self
            .by_type_state
            .lock()
            .unwrap()
            .get(&(job_type.to_string(), state))
            .map(|s| s.iter().map(|(_, id)| *id).collect())
            .unwrap_or_default())
    }

    async fn delayed_candidates(&self, limit: u64) -> anyhow::Result<Vec<DelayedCandidate>> {
        let ids = self
            .by_state
            .lock()
            .unwrap()
            .get(&JobState::Delayed)
            .map(|s| s.iter().map(|(_, id)| *id).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut candidates: Vec<DelayedCandidate> = ids
            .into_iter()
            .filter_map(|id| {
                let fields = self.jobs.get(&id)?;
                Some(DelayedCandidate {
                    id,
                    delay: fields.delay.unwrap_or(0),
                    created_at: fields.created_at.unwrap_or(0),
                })
            })
            .collect();
        candidates.sort_by_key(|c| c.delay + c.created_at);
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn notify_push(&self, job_type: &str) -> anyhow::Result<()> {
        let tx = self.notify_channel(job_type);
        let _ = tx.send(());
        Ok(())
    }

    async fn notify_pop(&self, job_type: &str, timeout: Duration) -> anyhow::Result<bool> {
        self.notify_channel(job_type);
        // Clone the `Arc` out and drop the `DashMap` shard guard before
        // awaiting, so no lock is held across the suspension point.
        let rx_entry = self
            .notify_rx
            .get(job_type)
            .expect("just created above")
            .clone();
        let mut rx = rx_entry.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(())) => Ok(true),
            Ok(None) => Ok(false),
            Err(_) => Ok(false),
        }
    }

    async fn add_work_time(&self, ms: i64) -> anyhow::Result<()> {
        self.work_time.fetch_add(ms, Ordering::SeqCst);
        Ok(())
    }

    async fn work_time(&self) -> anyhow::Result<i64> {
        Ok(self.work_time.load(Ordering::SeqCst))
    }

    async fn setting(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.settings.get(name).map(|e| e.clone()))
    }

    async fn set_event_owner(&self, job_id: u64, process_id: &str) -> anyhow::Result<()> {
        self.event_owners.insert(job_id, process_id.to_string());
        Ok(())
    }

    async fn clear_event_owner(&self, job_id: u64) -> anyhow::Result<()> {
        self.event_owners.remove(&job_id);
        Ok(())
    }

    async fn event_owner(&self, job_id: u64) -> anyhow::Result<Option<String>> {
        Ok(self.event_owners.get(&job_id).map(|e| e.clone()))
    }

    async fn publish(&self, process_id: &str, message: &EventMessage) -> anyhow::Result<()> {
        if let Some(mut subs) = self.channels.get_mut(process_id) {
            subs.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, process_id: &str) -> anyhow::Result<mpsc::UnboundedReceiver<EventMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.entry(process_id.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn index_search(&self, id: u64, data: &serde_json::Value) -> anyhow::Result<()> {
        self.search_index.insert(id, data.clone());
        Ok(())
    }

    async fn remove_search(&self, id: u64) -> anyhow::Result<()> {
        self.search_index.remove(&id);
        Ok(())
    }
}
