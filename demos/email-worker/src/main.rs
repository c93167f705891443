//! Process `email` jobs with a plain `Handler` impl.
//!
//! Shows how to implement `queue_core::Handler` directly - no adapters,
//! just a struct and an `async fn`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use queue_core::{Handler, Job, Queue, QueueConfig};
use queue_store_redis::{RedisStore, RedisStoreConfig};
use serde_json::json;

struct SendEmail;

#[async_trait]
impl Handler for SendEmail {
    async fn handle(&self, job: &mut Job) -> anyhow::Result<()> {
        let to = job
            .data
            .get("to")
            .and_then(|v| v.as_str())
            .context("email job missing `to`")?
            .to_string();

        job.log("sending to %s", &[to.clone().into()]).await?;
        // A real handler would call an email provider's API here.
        job.progress(1, 1).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(
        RedisStore::connect(RedisStoreConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string()),
            prefix: "email-worker-demo".to_string(),
            ..Default::default()
        })
        .await?,
    );
    let queue = Queue::create_queue(store, QueueConfig::default());

    let mut job = queue.create("email", json!({"to": "ops@example.com"}));
    job.priority("high")?;
    job.save().await?;

    let _promoter = queue.promote();
    let workers = queue.process("email", 2, SendEmail).await;

    for handle in workers {
        handle.await?;
    }
    Ok(())
}
