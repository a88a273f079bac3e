mod config;
mod error;
mod handlers;
mod invalidator;
mod loader;
mod lock;
mod migrations;
mod models;
mod run_store;
mod scheduler;
mod source;
mod transform;
mod views;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use config::PipelineConfig;
use run_store::RunStore;
use scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("prosthesis_etl=debug,tower_http=debug")),
        )
        .init();

    let config_path =
        std::env::var("PROSTHESIS_ETL_CONFIG").unwrap_or_else(|_| "./pipeline.toml".to_string());
    let config = PipelineConfig::load(&config_path)?;

    let crm_pool = PgPoolOptions::new()
        .max_connections(config.crm.pool_size)
        .connect(&config.crm.database_url)
        .await?;

    let telemetry_client = clickhouse::Client::default()
        .with_url(&config.telemetry.url)
        .with_database(&config.telemetry.database)
        .with_user(&config.telemetry.user)
        .with_password(&config.telemetry.password);

    let mart_client = clickhouse::Client::default()
        .with_url(&config.mart.url)
        .with_database(&config.mart.database)
        .with_user(&config.mart.user)
        .with_password(&config.mart.password);

    migrations::run_all(&crm_pool, &telemetry_client, &mart_client, config.retention_days).await?;

    let run_store_path =
        std::env::var("PROSTHESIS_ETL_RUN_STORE").unwrap_or_else(|_| "./prosthesis_etl_runs.db".to_string());
    let run_store = RunStore::open(&run_store_path)?;
    tracing::info!("run store opened at {run_store_path}");

    let scheduler = Arc::new(Scheduler::new(config, crm_pool, telemetry_client, mart_client, run_store));

    let scheduler_handle = scheduler.clone();
    tokio::spawn(async move { scheduler_handle.run_forever().await });

    let state = AppState { scheduler };

    let app = Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/runs", get(handlers::runs::list_runs))
        .route("/runs/{id}", get(handlers::runs::get_run))
        .route("/runs/trigger", post(handlers::runs::trigger_run))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr_str = std::env::var("PROSTHESIS_ETL_ADMIN_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
    let addr: SocketAddr = addr_str.parse()?;
    tracing::info!("prosthesis-etl admin surface listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
