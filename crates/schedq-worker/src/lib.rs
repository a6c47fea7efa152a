use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use schedq_core::{JobDescriptor, QueueEntry};
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct WorkerConfig {
    pub server_url: String,    // e.g. http://localhost:8080
    pub queue: String,         // e.g. default
    pub concurrency: usize,    // e.g. 10
    pub poll_interval_ms: u64, // e.g. 500
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let server_url =
            std::env::var("QUEUE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let queue = std::env::var("QUEUE_NAME").unwrap_or_else(|_| "default".to_string());
        let concurrency = std::env::var("CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let poll_interval_ms = std::env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        Self {
            server_url,
            queue,
            concurrency,
            poll_interval_ms,
        }
    }
}

/// What a handler decided about one claimed job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Done; the entry is removed from the queue.
    Finish,
    /// Transient failure; the entry is flagged errored with a description.
    Error(String),
    /// Try again no earlier than the given time, within the job's
    /// schedule policy.
    Reschedule(DateTime<Utc>),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &JobDescriptor) -> JobOutcome;
}

/// Placeholder handler: logs the job and finishes it.
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn run(&self, job: &JobDescriptor) -> JobOutcome {
        tracing::info!(kind = %job.kind, state = %job.state, "handled job");
        JobOutcome::Finish
    }
}

#[derive(serde::Deserialize)]
struct PoppedJob {
    entry: QueueEntry,
    job: JobDescriptor,
}

#[derive(serde::Deserialize)]
struct PopResponse {
    job: Option<PoppedJob>,
}

#[derive(serde::Serialize)]
struct UpdateStatusRequest {
    description: String,
    status: Option<&'static str>,
}

#[derive(serde::Serialize)]
struct RescheduleRequest<'a> {
    job: &'a JobDescriptor,
    scheduled_at: DateTime<Utc>,
}

#[derive(serde::Serialize)]
struct FinishRequest<'a> {
    job: &'a JobDescriptor,
}

pub async fn run_worker(cfg: WorkerConfig, handler: Arc<dyn JobHandler>) -> anyhow::Result<()> {
    let client = Client::new();
    let sem = Arc::new(Semaphore::new(cfg.concurrency));
    let base = cfg.server_url.trim_end_matches('/').to_string();

    tracing::info!(
        queue=%cfg.queue,
        concurrency=cfg.concurrency,
        poll_interval_ms=cfg.poll_interval_ms,
        server_url=%base,
        "worker started"
    );

    loop {
        let pop_url = format!("{}/v1/queues/{}/pop", base, cfg.queue);
        let resp = client.post(&pop_url).send().await;

        let popped = match resp {
            Ok(r) if r.status().is_success() => match r.json::<PopResponse>().await {
                Ok(body) => body.job,
                Err(e) => {
                    tracing::warn!(error=%e, "failed to parse pop response");
                    tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)).await;
                    continue;
                }
            },
            Ok(r) => {
                let status = r.status();
                let text = r.text().await.unwrap_or_default();
                tracing::warn!(%status, body=%text, "pop request failed");
                tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)).await;
                continue;
            }
            Err(e) => {
                tracing::warn!(error=%e, "pop request error");
                tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)).await;
                continue;
            }
        };

        let Some(popped) = popped else {
            tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)).await;
            continue;
        };

        let permit = sem.clone().acquire_owned().await?;
        let client = client.clone();
        let base = base.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = process_one(&client, &base, &handler, popped).await {
                tracing::warn!(error=%e, "job processing task failed");
            }
        });
    }
}

async fn process_one(
    client: &Client,
    base: &str,
    handler: &Arc<dyn JobHandler>,
    popped: PoppedJob,
) -> anyhow::Result<()> {
    let job = popped.job;
    let entry = popped.entry;

    tracing::info!(
        id = entry.id,
        queue = %entry.queue,
        kind = %job.kind,
        schedules = entry.num_schedules,
        "processing job"
    );

    match handler.run(&job).await {
        JobOutcome::Finish => finish(client, base, &job).await,
        JobOutcome::Error(description) => {
            report_error(client, base, &job, &description).await
        }
        JobOutcome::Reschedule(at) => {
            if let Err(e) = reschedule(client, base, &job, at).await {
                // Typically the schedule limit; surface it on the entry.
                tracing::warn!(id = entry.id, error=%e, "reschedule rejected");
                return report_error(client, base, &job, "schedule limit reached").await;
            }
            Ok(())
        }
    }
}

async fn finish(client: &Client, base: &str, job: &JobDescriptor) -> anyhow::Result<()> {
    let url = format!("{base}/v1/jobs/finish");
    let r = client.post(url).json(&FinishRequest { job }).send().await?;
    if !r.status().is_success() {
        let status = r.status();
        let text = r.text().await.unwrap_or_default();
        anyhow::bail!("finish failed: {} {}", status, text);
    }
    Ok(())
}

async fn report_error(
    client: &Client,
    base: &str,
    job: &JobDescriptor,
    description: &str,
) -> anyhow::Result<()> {
    let id = job
        .job_id
        .ok_or_else(|| anyhow::anyhow!("popped job without an id"))?;
    let url = format!("{base}/v1/jobs/{id}/status");
    let body = UpdateStatusRequest {
        description: description.to_string(),
        status: Some("error"),
    };
    let r = client.post(url).json(&body).send().await?;
    if !r.status().is_success() {
        let status = r.status();
        let text = r.text().await.unwrap_or_default();
        anyhow::bail!("status update failed: {} {}", status, text);
    }
    Ok(())
}

async fn reschedule(
    client: &Client,
    base: &str,
    job: &JobDescriptor,
    scheduled_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    let url = format!("{base}/v1/jobs/reschedule");
    let body = RescheduleRequest { job, scheduled_at };
    let r = client.post(url).json(&body).send().await?;
    if !r.status().is_success() {
        let status = r.status();
        let text = r.text().await.unwrap_or_default();
        anyhow::bail!("reschedule failed: {} {}", status, text);
    }
    Ok(())
}
