//! End-to-end scenario tests exercising the six literal scenarios against
//! the in-memory store. See the module doc on `lib.rs` for the
//! architecture these walk through.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queue_testing::MemoryStore;
use serde_json::json;

use crate::{EventKind, EventMessage, Handler, Job, JobState, Queue, QueueConfig};

fn queue() -> Queue {
    let store = Arc::new(MemoryStore::new());
    Queue::create_queue(store, QueueConfig::default())
}

struct Succeeds;

#[async_trait]
impl Handler for Succeeds {
    async fn handle(&self, _job: &mut Job) -> anyhow::Result<()> {
        Ok(())
    }
}

struct AlwaysFails;

#[async_trait]
impl Handler for AlwaysFails {
    async fn handle(&self, _job: &mut Job) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("boom"))
    }
}

/// Fails its first `fail_times` invocations, then succeeds.
struct FailsThenSucceeds {
    remaining: AtomicU32,
}

#[async_trait]
impl Handler for FailsThenSucceeds {
    async fn handle(&self, _job: &mut Job) -> anyhow::Result<()> {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(anyhow::anyhow!("transient"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn scenario_1_high_priority_email_save() {
    let q = queue();
    let mut job = q.create("email", json!({"to": "a"}));
    job.priority("high").unwrap();
    job.save().await.unwrap();

    assert!(job.id.is_some());
    assert_eq!(job.state, JobState::Inactive);
    assert_eq!(job.priority_value().score(), -10);
    let ids = q.state(JobState::Inactive, 0, 100).await.unwrap();
    assert!(ids.contains(&job.id.unwrap()));
}

#[tokio::test]
async fn scenario_2_one_worker_completes_and_reports_work_time() {
    let q = queue();
    let mut job = q.create("email", json!({"to": "a"}));
    job.save().await.unwrap();
    let id = job.id.unwrap();

    let observed: Arc<std::sync::Mutex<Vec<EventKind>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let observed_for_listener = observed.clone();
    job.on(Arc::new(move |msg: &EventMessage| {
        observed_for_listener.lock().unwrap().push(msg.event);
    }))
    .await
    .unwrap();

    let workers = q.process("email", 1, Succeeds).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    for h in workers {
        h.abort();
    }

    let loaded = q.get(id).await.unwrap();
    assert_eq!(loaded.state, JobState::Complete);
    assert_eq!(loaded.progress, 100);
    assert!(q.work_time().await.unwrap() >= 0);

    let seen = observed.lock().unwrap().clone();
    assert!(seen.contains(&EventKind::Start), "expected a start event, saw {seen:?}");
    assert!(seen.contains(&EventKind::Complete), "expected a complete event, saw {seen:?}");
}

struct RecordsOrder {
    order: Arc<std::sync::Mutex<Vec<u64>>>,
}

#[async_trait]
impl Handler for RecordsOrder {
    async fn handle(&self, job: &mut Job) -> anyhow::Result<()> {
        self.order.lock().unwrap().push(job.id.unwrap());
        Ok(())
    }
}

#[tokio::test]
async fn scenario_3_critical_job_processed_before_normal() {
    let q = queue();
    let mut normal = q.create("email", json!({}));
    normal.save().await.unwrap();
    let mut critical = q.create("email", json!({}));
    critical.priority("critical").unwrap();
    critical.save().await.unwrap();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let workers = q
        .process("email", 1, RecordsOrder { order: order.clone() })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    for h in workers {
        h.abort();
    }

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec![critical.id.unwrap(), normal.id.unwrap()]);
}

#[tokio::test]
async fn scenario_4_delayed_job_promotes_within_window() {
    let q = queue();
    let mut job = q.create("report", json!({}));
    job.delay(200);
    job.save().await.unwrap();
    let id = job.id.unwrap();
    assert_eq!(job.state, JobState::Delayed);

    let promoter = q.promote_every(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(300)).await;
    promoter.abort();

    let loaded = q.get(id).await.unwrap();
    assert_eq!(loaded.state, JobState::Inactive);
}

#[tokio::test]
async fn scenario_5_exhausted_attempts_terminate_failed() {
    let q = queue();
    let mut job = q.create("report", json!({}));
    job.attempts(3);
    job.save().await.unwrap();
    let id = job.id.unwrap();

    for _ in 0..3 {
        let (remaining, _attempts, _max) = job.attempt().await.unwrap();
        if remaining <= 0 {
            job.error(anyhow::anyhow!("always fails")).await.unwrap();
            job.failed().await.unwrap();
        }
    }

    let loaded = q.get(id).await.unwrap();
    assert_eq!(loaded.state, JobState::Failed);
    assert_eq!(loaded.attempts, 3);
    assert!(!loaded.error.is_empty());
}

#[tokio::test]
async fn scenario_5b_worker_loop_exhausts_attempts_to_failed() {
    let q = queue();
    let mut job = q.create("report", json!({}));
    job.attempts(3);
    job.save().await.unwrap();
    let id = job.id.unwrap();

    let handler = AlwaysFails;
    let workers = q.process("report", 1, handler).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    for h in workers {
        h.abort();
    }

    let loaded = q.get(id).await.unwrap();
    assert_eq!(loaded.state, JobState::Failed);
    assert_eq!(loaded.attempts, 3);
}

#[tokio::test]
async fn scenario_5c_handler_recovers_before_exhaustion_completes() {
    let q = queue();
    let mut job = q.create("report", json!({}));
    job.attempts(3);
    job.save().await.unwrap();
    let id = job.id.unwrap();

    let handler = FailsThenSucceeds {
        remaining: AtomicU32::new(2),
    };
    let workers = q.process("report", 1, handler).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    for h in workers {
        h.abort();
    }

    let loaded = q.get(id).await.unwrap();
    assert_eq!(loaded.state, JobState::Complete);
    assert!(loaded.attempts < 3);
}

#[tokio::test]
async fn scenario_6_abandoned_active_job_salvaged_then_completed() {
    let q = queue();
    let mut job = q.create("email", json!({}));
    job.save().await.unwrap();
    let id = job.id.unwrap();
    // Simulate a previous process's worker crashing mid-job.
    job.active().await.unwrap();
    assert_eq!(job.state, JobState::Active);

    let workers = q.process("email", 1, Succeeds).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    for h in workers {
        h.abort();
    }

    let loaded = q.get(id).await.unwrap();
    assert_eq!(loaded.state, JobState::Complete);
}
