//! Redis implementation of [`queue_core::Store`].
//!
//! This crate provides the concrete storage backend for `queue-core`'s
//! job state machine, dispatcher, promoter and event bus.
//!
//! # Key layout
//!
//! All keys share a configurable prefix (empty by default):
//!
//! | Key | Kind | Purpose |
//! |---|---|---|
//! | `ids` | counter | id allocator |
//! | `job:types` | set | known types |
//! | `job:<id>` | hash | record fields |
//! | `job:<id>:log` | list | log entries |
//! | `jobs` | zset by priority | global index |
//! | `jobs:<state>` | zset by priority | per-state index |
//! | `jobs:<type>:<state>` | zset by priority | per-(type,state) index |
//! | `<type>:jobs` | list | per-type notification |
//! | `stats:work-time` | counter (ms) | cumulative worker time |
//! | `settings` | hash | settings |
//! | `events:owners` | hash | `job:<id>` -> owning process id |
//!
//! Ids are stored as the 12-digit zero-padded strings from
//! `queue_core::ids`, so a zset's lexicographic member tiebreak for equal
//! scores still lands in numeric id order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use queue_store_redis::{RedisStore, RedisStoreConfig};
//!
//! let store = RedisStore::connect(RedisStoreConfig {
//!     url: "redis://127.0.0.1/".into(),
//!     prefix: "myapp".into(),
//!     ..Default::default()
//! }).await?;
//! let queue = queue_core::Queue::create_queue(std::sync::Arc::new(store), Default::default());
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt;
use queue_core::{ids, DelayedCandidate, EventMessage, JobFields, JobState, Store};
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Connection settings. Construct with `Default::default()` and override
/// the fields that matter, matching the teacher's plain-struct config
/// style (no external config-file crate).
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// A `redis://` connection URL.
    pub url: String,
    /// Key prefix. Empty means no prefix.
    pub prefix: String,
    /// Connection pool size.
    pub pool_size: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1/".to_string(),
            prefix: String::new(),
            pool_size: 16,
        }
    }
}

/// A [`queue_core::Store`] backed by Redis. One pooled multiplexed
/// connection per command, plus one dedicated connection per active
/// subscriber, per `spec.md` §5 ("one dedicated connection per event-bus
/// subscriber").
pub struct RedisStore {
    pool: Pool,
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    /// Connect and build the connection pool.
    pub async fn connect(config: RedisStoreConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.clone())?;
        let mut pool_cfg = PoolConfig::from_url(&config.url);
        pool_cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));
        let pool = pool_cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self {
            pool,
            client,
            prefix: config.prefix,
        })
    }

    fn key(&self, suffix: impl AsRef<str>) -> String {
        if self.prefix.is_empty() {
            suffix.as_ref().to_string()
        } else {
            format!("{}:{}", self.prefix, suffix.as_ref())
        }
    }

    async fn conn(&self) -> anyhow::Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

fn field_map_to_job_fields(map: HashMap<String, String>) -> Option<JobFields> {
    if map.is_empty() {
        return None;
    }
    Some(JobFields {
        job_type: map.get("job_type").cloned(),
        data: map.get("data").cloned(),
        priority: map.get("priority").and_then(|v| v.parse().ok()),
        state: map.get("state").cloned(),
        delay: map.get("delay").and_then(|v| v.parse().ok()),
        attempts: map.get("attempts").and_then(|v| v.parse().ok()),
        max_attempts: map.get("max_attempts").and_then(|v| v.parse().ok()),
        progress: map.get("progress").and_then(|v| v.parse().ok()),
        error: map.get("error").cloned(),
        created_at: map.get("created_at").and_then(|v| v.parse().ok()),
        updated_at: map.get("updated_at").and_then(|v| v.parse().ok()),
        failed_at: map.get("failed_at").and_then(|v| v.parse().ok()),
        duration: map.get("duration").and_then(|v| v.parse().ok()),
    })
}

macro_rules! set_field {
    ($pairs:ident, $name:literal, $value:expr) => {
        if let Some(v) = $value {
            $pairs.push(($name.to_string(), v.to_string()));
        }
    };
}

#[async_trait]
impl Store for RedisStore {
    async fn next_id(&self) -> anyhow::Result<u64> {
        let mut conn = self.conn().await?;
        let id: u64 = conn.incr(self.key("ids"), 1).await?;
        Ok(id)
    }

    async fn register_type(&self, job_type: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(self.key("job:types"), job_type).await?;
        Ok(())
    }

    async fn known_types(&self) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let types: Vec<String> = conn.smembers(self.key("job:types")).await?;
        Ok(types)
    }

    async fn write_job(&self, id: u64, fields: &JobFields) -> anyhow::Result<()> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        set_field!(pairs, "job_type", fields.job_type.clone());
        set_field!(pairs, "data", fields.data.clone());
        set_field!(pairs, "priority", fields.priority);
        set_field!(pairs, "state", fields.state.clone());
        set_field!(pairs, "delay", fields.delay);
        set_field!(pairs, "attempts", fields.attempts);
        set_field!(pairs, "max_attempts", fields.max_attempts);
        set_field!(pairs, "progress", fields.progress);
        set_field!(pairs, "error", fields.error.clone());
        set_field!(pairs, "created_at", fields.created_at);
        set_field!(pairs, "updated_at", fields.updated_at);
        set_field!(pairs, "failed_at", fields.failed_at);
        set_field!(pairs, "duration", fields.duration);
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.hset_multiple(self.key(format!("job:{id}")), &pairs).await?;
        Ok(())
    }

    async fn read_job(&self, id: u64) -> anyhow::Result<Option<JobFields>> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn.hgetall(self.key(format!("job:{id}"))).await?;
        Ok(field_map_to_job_fields(map))
    }

    async fn delete_job(&self, id: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.key(format!("job:{id}"))).await?;
        Ok(())
    }

    async fn push_log(&self, id: u64, line: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.rpush(self.key(format!("job:{id}:log")), line).await?;
        Ok(())
    }

    async fn read_log(&self, id: u64) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let lines: Vec<String> = conn.lrange(self.key(format!("job:{id}:log")), 0, -1).await?;
        Ok(lines)
    }

    async fn delete_log(&self, id: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.key(format!("job:{id}:log"))).await?;
        Ok(())
    }

    async fn index_global_add(&self, id: u64, priority: i32) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .zadd(self.key("jobs"), ids::encode(id), priority)
            .await?;
        Ok(())
    }

    async fn index_global_remove(&self, id: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zrem(self.key("jobs"), ids::encode(id)).await?;
        Ok(())
    }

    async fn index_state_add(&self, state: JobState, id: u64, priority: i32) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .zadd(self.key(format!("jobs:{state}")), ids::encode(id), priority)
            .await?;
        Ok(())
    }

    async fn index_state_remove(&self, state: JobState, id: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .zrem(self.key(format!("jobs:{state}")), ids::encode(id))
            .await?;
        Ok(())
    }

    async fn index_state_range(
        &self,
        state: JobState,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<u64>> {
        let mut conn = self.conn().await?;
        let start = offset as isize;
        let stop = start + limit as isize - 1;
        let members: Vec<String> = conn
            .zrange(self.key(format!("jobs:{state}")), start, stop)
            .await?;
        Ok(members.iter().filter_map(|m| ids::decode(m)).collect())
    }

    async fn index_state_card(&self, state: JobState) -> anyhow::Result<u64> {
        let mut conn = self.conn().await?;
        let card: u64 = conn.zcard(self.key(format!("jobs:{state}"))).await?;
        Ok(card)
    }

    async fn index_type_state_add(
        &self,
        job_type: &str,
        state: JobState,
        id: u64,
        priority: i32,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .zadd(
                self.key(format!("jobs:{job_type}:{state}")),
                ids::encode(id),
                priority,
            )
            .await?;
        Ok(())
    }

    async fn index_type_state_remove(
        &self,
        job_type: &str,
        state: JobState,
        id: u64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .zrem(self.key(format!("jobs:{job_type}:{state}")), ids::encode(id))
            .await?;
        Ok(())
    }

    async fn index_type_state_lowest(
        &self,
        job_type: &str,
        state: JobState,
    ) -> anyhow::Result<Option<u64>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrange(self.key(format!("jobs:{job_type}:{state}")), 0, 0)
            .await?;
        Ok(members.first().and_then(|m| ids::decode(m)))
    }

    async fn index_type_state_all(
        &self,
        job_type: &str,
        state: JobState,
    ) -> anyhow::Result<Vec<u64>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrange(self.key(format!("jobs:{job_type}:{state}")), 0, -1)
            .await?;
        Ok(members.iter().filter_map(|m| ids::decode(m)).collect())
    }

    async fn delayed_candidates(&self, limit: u64) -> anyhow::Result<Vec<DelayedCandidate>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrange(self.key(format!("jobs:{}", JobState::Delayed)), 0, -1)
            .await?;

        let mut candidates = Vec::with_capacity(members.len());
        for member in &members {
            let Some(id) = ids::decode(member) else {
                continue;
            };
            let map: HashMap<String, String> = conn.hgetall(self.key(format!("job:{id}"))).await?;
            let delay = map.get("delay").and_then(|v| v.parse().ok()).unwrap_or(0);
            let created_at = map
                .get("created_at")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            candidates.push(DelayedCandidate { id, delay, created_at });
        }
        candidates.sort_by_key(|c| c.delay + c.created_at);
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn notify_push(&self, job_type: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(self.key(format!("{job_type}:jobs")), 1).await?;
        Ok(())
    }

    async fn notify_pop(&self, job_type: &str, timeout: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn().await?;
        let result: Option<(String, String)> = conn
            .blpop(self.key(format!("{job_type}:jobs")), timeout.as_secs_f64())
            .await?;
        Ok(result.is_some())
    }

    async fn add_work_time(&self, ms: i64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.incr(self.key("stats:work-time"), ms).await?;
        Ok(())
    }

    async fn work_time(&self) -> anyhow::Result<i64> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = conn.get(self.key("stats:work-time")).await?;
        Ok(value.unwrap_or(0))
    }

    async fn setting(&self, name: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.hget(self.key("settings"), name).await?;
        Ok(value)
    }

    async fn set_event_owner(&self, job_id: u64, process_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .hset(self.key("events:owners"), format!("job:{job_id}"), process_id)
            .await?;
        Ok(())
    }

    async fn clear_event_owner(&self, job_id: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .hdel(self.key("events:owners"), format!("job:{job_id}"))
            .await?;
        Ok(())
    }

    async fn event_owner(&self, job_id: u64) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let owner: Option<String> = conn
            .hget(self.key("events:owners"), format!("job:{job_id}"))
            .await?;
        Ok(owner)
    }

    async fn publish(&self, process_id: &str, message: &EventMessage) -> anyhow::Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn().await?;
        let _: () = conn.publish(self.key(process_id), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, process_id: &str) -> anyhow::Result<mpsc::UnboundedReceiver<EventMessage>> {
        let channel = self.key(process_id);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(%err, "malformed pubsub payload");
                        continue;
                    }
                };
                match serde_json::from_str::<EventMessage>(&payload) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "undecodable event message"),
                }
            }
            debug!(channel = %channel, "subscriber stream ended");
        });
        Ok(rx)
    }

    async fn index_search(&self, id: u64, _data: &serde_json::Value) -> anyhow::Result<()> {
        debug!(id, "no search indexer configured; skipping index_search");
        Ok(())
    }

    async fn remove_search(&self, id: u64) -> anyhow::Result<()> {
        debug!(id, "no search indexer configured; skipping remove_search");
        Ok(())
    }
}
