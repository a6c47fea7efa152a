use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schedq_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = schedq_worker::WorkerConfig::from_env();
    schedq_worker::run_worker(cfg, Arc::new(schedq_worker::LogHandler)).await
}
