use std::sync::Arc;

use schedq_core::QueueManager;
use schedq_server::app::{self, AppState};
use schedq_server::{auth, config::Config, metrics, rate_limit};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schedq_server::store::postgres::PostgresStore;

#[tokio::main]
async fn main() {
    metrics::init_metrics();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schedq_server=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await
        .expect("failed to connect to Postgres");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let store = Arc::new(PostgresStore::new(pool));
    let state = AppState {
        queue: QueueManager::new(store),
    };

    let api_auth = auth::ApiAuth::new(cfg.api_token.clone());
    let limiter = rate_limit::RateLimiter::new(cfg.rate_limit_per_minute);

    let app = app::build_app(state, api_auth, limiter).layer(TraceLayer::new_for_http());

    tracing::info!("listening on {}", cfg.bind);

    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .expect("failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    async fn shutdown_signal() {
        // Wait for Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    }
}
