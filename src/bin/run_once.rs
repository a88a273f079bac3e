use tracing_subscriber::EnvFilter;

use prosthesis_etl::config::PipelineConfig;
use prosthesis_etl::migrations;
use prosthesis_etl::run_store::RunStore;
use prosthesis_etl::scheduler::Scheduler;

/// One-shot ETL run: loads config, runs migrations, executes exactly one
/// scheduler tick, then exits. Mirrors `rush-api`'s `bin/anomaly_engine.rs`
/// — a single background engine pulled out of the long-running server and
/// driven to completion once, for cron-style invocation or manual backfill.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prosthesis_etl=debug")))
        .init();

    let config_path =
        std::env::var("PROSTHESIS_ETL_CONFIG").unwrap_or_else(|_| "./pipeline.toml".to_string());
    let config = PipelineConfig::load(&config_path)?;

    let crm_pool = sqlx::postgres::PgPoolOptions::new()
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

    let scheduler = Scheduler::new(config, crm_pool, telemetry_client, mart_client, run_store);

    tracing::info!("prosthesis-etl-once starting a single run");
    scheduler.tick().await?;
    tracing::info!("prosthesis-etl-once finished");

    Ok(())
}
