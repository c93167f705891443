//! Fetch a URL and stash its status/body length on the job record.
//!
//! Uses `reqwest` directly inside the handler, matching `http-fetcher`'s
//! "no adapters, no ceremony" style. Also shows a delayed retry report:
//! the report is re-enqueued with a delay rather than retried
//! immediately, and a listener attached via `Job::on` prints every
//! lifecycle event for the first job as it happens.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use queue_core::{Handler, Job, Queue, QueueConfig};
use queue_store_redis::{RedisStore, RedisStoreConfig};
use serde_json::json;

struct FetchReport {
    client: reqwest::Client,
}

#[async_trait]
impl Handler for FetchReport {
    async fn handle(&self, job: &mut Job) -> anyhow::Result<()> {
        let url = job
            .data
            .get("url")
            .and_then(|v| v.as_str())
            .context("report job missing `url`")?
            .to_string();

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        job.log("fetched %s -> %d (%d bytes)", &[
            url.into(),
            (status as i64).into(),
            (body.len() as i64).into(),
        ])
        .await?;
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
            prefix: "report-fetcher-demo".to_string(),
            ..Default::default()
        })
        .await?,
    );
    let queue = Queue::create_queue(store, QueueConfig::default());

    let mut job = queue.create("report", json!({"url": "https://example.com"}));
    job.attempts(3);
    job.save().await?;
    job.on(Arc::new(|event| {
        println!("event: {event:?}");
    }))
    .await?;

    let mut nightly = queue.create("report", json!({"url": "https://httpbin.org/status/200"}));
    nightly.delay(60_000);
    nightly.save().await?;

    let _promoter = queue.promote();
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;
    let workers = queue.process("report", 1, FetchReport { client }).await;

    for handle in workers {
        handle.await?;
    }
    Ok(())
}
