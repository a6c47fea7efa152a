use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use schedq_core::MaxSchedules;
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "schedq", version, about = "CLI for the schedq job queue")]
struct Cli {
    #[arg(long, default_value = "http://localhost:8080")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a job onto a queue
    Push {
        #[arg(long, default_value = "default")]
        queue: String,

        /// Job kind, e.g. send-mail
        #[arg(long)]
        kind: String,

        /// JSON state string, e.g. '{"to":"a@b.c"}'
        #[arg(long, default_value = "{}")]
        json: String,

        /// Priority (lower = served first; default 0)
        #[arg(long)]
        priority: Option<i32>,

        /// Allowed reschedules; conflicts with --unlimited
        #[arg(long, conflicts_with = "unlimited")]
        max_schedules: Option<i32>,

        /// Allow unlimited reschedules
        #[arg(long)]
        unlimited: bool,

        /// Not-before time, RFC 3339 (e.g. 2026-08-07T12:00:00Z)
        #[arg(long)]
        scheduled_at: Option<DateTime<Utc>>,
    },

    /// Show eligible-entry counts per queue
    Status,

    /// List the entries of a queue with their slots
    Jobs {
        queue: String,
    },

    /// Ping server health endpoint
    Ping,

    /// Run a worker (same as schedq-worker binary, but convenient)
    Worker {
        #[arg(long, default_value = "default")]
        queue: String,

        #[arg(long, default_value_t = 10)]
        concurrency: usize,

        #[arg(long, default_value_t = 500)]
        poll_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schedq_worker=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let base = cli.server_url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Ping => {
            let url = format!("{}/healthz", base);
            let r = reqwest::get(url).await?;
            let text = r.text().await.unwrap_or_default();
            println!("{}", text);
        }

        Commands::Push {
            queue,
            kind,
            json: state,
            priority,
            max_schedules,
            unlimited,
            scheduled_at,
        } => {
            let state: Value = serde_json::from_str(&state).context("invalid JSON state")?;

            let max_schedules = if unlimited {
                Some(MaxSchedules::Unlimited)
            } else {
                max_schedules.map(MaxSchedules::Limited)
            };

            let body = json!({
                "queue": queue,
                "kind": kind,
                "state": state,
                "priority": priority,
                "max_schedules": max_schedules,
                "scheduled_at": scheduled_at,
            });

            let url = format!("{}/v1/jobs", base);
            let client = reqwest::Client::new();
            let r = client.post(url).json(&body).send().await?;

            if !r.status().is_success() {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                anyhow::bail!("push failed: {} {}", status, body);
            }

            let body: Value = r.json().await?;
            println!("{}", body["job_id"]);
        }

        Commands::Status => {
            let url = format!("{}/v1/queues", base);
            let r = reqwest::get(url).await?;
            if !r.status().is_success() {
                anyhow::bail!("status failed: {}", r.status());
            }

            let body: Value = r.json().await?;
            let queues = body["queues"]
                .as_object()
                .context("malformed status response")?;
            if queues.is_empty() {
                println!("no queues with eligible jobs");
            }
            for (queue, count) in queues {
                println!("{queue}\t{count}");
            }
        }

        Commands::Jobs { queue } => {
            let url = format!("{}/v1/queues/{}/jobs", base, queue);
            let r = reqwest::get(url).await?;
            if !r.status().is_success() {
                anyhow::bail!("jobs failed: {}", r.status());
            }

            let statuses: Vec<Value> = r.json().await?;
            for status in statuses {
                println!(
                    "{}\t{}/{}\t{}\t{}",
                    status["entry"]["id"],
                    status["placement"]["slot"],
                    status["placement"]["slots"],
                    status["entry"]["status"].as_str().unwrap_or("?"),
                    status["entry"]["description"].as_str().unwrap_or("")
                );
            }
        }

        Commands::Worker {
            queue,
            concurrency,
            poll_interval_ms,
        } => {
            let cfg = schedq_worker::WorkerConfig {
                server_url: base,
                queue,
                concurrency,
                poll_interval_ms,
            };
            schedq_worker::run_worker(cfg, Arc::new(schedq_worker::LogHandler)).await?;
        }
    }

    Ok(())
}
