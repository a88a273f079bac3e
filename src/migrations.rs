use clickhouse::Client;
use sqlx::PgPool;

/// Ordered, idempotent DDL for the CRM reference schema (`CREATE ... IF NOT
/// EXISTS` throughout, same idempotent-migration-list shape as the
/// ClickHouse `MIGRATIONS` constant below — applied on every startup so
/// local/dev/test environments never need a separate migration step).
const CRM_MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS prosthesis_models (
        model_id        BIGSERIAL PRIMARY KEY,
        model_code      TEXT NOT NULL UNIQUE,
        model_name      TEXT NOT NULL,
        category        TEXT NOT NULL CHECK (category IN ('arm','leg','hand','finger')),
        warranty_months INTEGER NOT NULL DEFAULT 12,
        is_active       BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS customers (
        customer_id  BIGSERIAL PRIMARY KEY,
        external_id  TEXT NOT NULL UNIQUE,
        last_name    TEXT NOT NULL,
        first_name   TEXT NOT NULL,
        middle_name  TEXT,
        email        TEXT NOT NULL,
        region       TEXT NOT NULL CHECK (region IN ('russia','europe')),
        branch       TEXT NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS prostheses (
        prosthesis_id   BIGSERIAL PRIMARY KEY,
        serial_number   TEXT NOT NULL UNIQUE,
        model_id        BIGINT NOT NULL REFERENCES prosthesis_models(model_id),
        customer_id     BIGINT REFERENCES customers(customer_id),
        chip_id         TEXT UNIQUE,
        status          TEXT NOT NULL CHECK (status IN ('manufactured','sold','active','maintenance','retired')),
        firmware_version TEXT NOT NULL DEFAULT '0.0.0',
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_prostheses_chip ON prostheses(chip_id) WHERE chip_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_prostheses_customer ON prostheses(customer_id)",
    // The flattened active-prosthesis view extract_reference reads from
    // (spec §4.1): joined Customer x Prosthesis x ProsthesisModel, filtered
    // to status='active' AND chip_id IS NOT NULL.
    "CREATE OR REPLACE VIEW active_prostheses AS
        SELECT
            c.customer_id, c.external_id, c.last_name, c.first_name, c.middle_name,
            c.email, c.region, c.branch, c.updated_at AS customer_updated_at,
            p.prosthesis_id, p.serial_number, p.chip_id, p.status, p.firmware_version,
            p.updated_at AS prosthesis_updated_at,
            m.model_id, m.model_code, m.model_name, m.category, m.warranty_months,
            m.is_active AS model_is_active
        FROM prostheses p
        JOIN customers c ON c.customer_id = p.customer_id
        JOIN prosthesis_models m ON m.model_id = p.model_id
        WHERE p.status = 'active' AND p.chip_id IS NOT NULL",
];

/// Schema for the CDC replica (`source.mode = replica`): same logical shape
/// as `active_prostheses`, fed by log-based replication rather than direct
/// reads. `replicated_at` is the monotonic version the replication process
/// stamps on apply, used for de-duplication instead of `updated_at`.
const CRM_REPLICA_MIGRATIONS: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS crm_replica",
    "CREATE TABLE IF NOT EXISTS crm_replica.active_prostheses (
        customer_id BIGINT NOT NULL,
        external_id TEXT NOT NULL,
        last_name TEXT NOT NULL,
        first_name TEXT NOT NULL,
        middle_name TEXT,
        email TEXT NOT NULL,
        region TEXT NOT NULL,
        branch TEXT NOT NULL,
        customer_updated_at TIMESTAMPTZ NOT NULL,
        prosthesis_id BIGINT NOT NULL,
        serial_number TEXT NOT NULL,
        chip_id TEXT NOT NULL,
        status TEXT NOT NULL,
        firmware_version TEXT NOT NULL,
        prosthesis_updated_at TIMESTAMPTZ NOT NULL,
        model_id BIGINT NOT NULL,
        model_code TEXT NOT NULL,
        model_name TEXT NOT NULL,
        category TEXT NOT NULL,
        warranty_months INTEGER NOT NULL,
        model_is_active BOOLEAN NOT NULL,
        replicated_at BIGINT NOT NULL,
        PRIMARY KEY (chip_id)
    )",
];

/// Idempotent ClickHouse DDL for the telemetry source table.
const TELEMETRY_MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS hourly_telemetry_aggregates
    (
        chip_id                 LowCardinality(String),
        hour_start              DateTime('UTC'),
        movements_count         UInt64,
        successful_movements    UInt64,
        avg_response_time_ms    Float64,
        min_response_time_ms    Float64,
        max_response_time_ms    Float64,
        avg_battery_level       Float64,
        min_battery_level       Float64,
        max_battery_level       Float64,
        avg_actuator_temp_c     Float64,
        max_actuator_temp_c     Float64,
        error_count             UInt64,
        warning_count           UInt64,
        avg_myo_amplitude       Float64,
        avg_connection_quality  Float64,
        updated_at              DateTime64(3, 'UTC') DEFAULT now64(3)
    )
    ENGINE = ReplacingMergeTree(updated_at)
    PARTITION BY toYYYYMM(hour_start)
    ORDER BY (chip_id, hour_start)
    SETTINGS index_granularity = 8192",
];

/// Idempotent ClickHouse DDL for the mart and its two read views (spec
/// §4.3/§4.4). `ReplacingMergeTree(etl_processed_at)` is the version-wins
/// merge engine: concurrent readers that query with `FINAL` (or an
/// `argMax`-based view, used here so ordinary `SELECT`s stay cheap) always
/// see the highest `etl_processed_at` per semantic key.
fn user_prosthesis_stats_ddl(retention_days: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS user_prosthesis_stats
    (
        external_id             LowCardinality(String),
        prosthesis_id           Int64,
        report_date             Date,
        report_hour             UInt8,

        customer_id             Int64,
        customer_name           String,
        email                   String,
        region                  LowCardinality(String),
        branch                  LowCardinality(String),

        serial_number           String,
        chip_id                 LowCardinality(String),
        firmware_version        String,
        model_code              LowCardinality(String),
        model_name              String,
        category                LowCardinality(String),

        movements_count         UInt64,
        successful_movements    UInt64,
        success_rate            Float64,

        avg_response_time_ms    Float64,
        min_response_time_ms    Float64,
        max_response_time_ms    Float64,

        avg_battery_level       Float64,
        min_battery_level       Float64,
        max_battery_level       Float64,

        avg_actuator_temp_c     Float64,
        max_actuator_temp_c     Float64,

        error_count             UInt64,
        warning_count           UInt64,

        avg_myo_amplitude       Float64,
        avg_connection_quality  Float64,

        etl_processed_at        DateTime64(3, 'UTC'),
        source_updated_at       DateTime64(3, 'UTC')
    )
    ENGINE = ReplacingMergeTree(etl_processed_at)
    PARTITION BY toYYYYMM(report_date)
    ORDER BY (external_id, report_date, report_hour, prosthesis_id)
    TTL report_date + INTERVAL {retention_days} DAY DELETE
    SETTINGS index_granularity = 8192"
    )
}

/// The two read views; the fact table's DDL is built separately so its TTL
/// can carry `PipelineConfig::retention_days` (spec §8: retention is
/// configurable, not a fixed constant).
const MART_VIEW_MIGRATIONS: &[&str] = &[
    // DailyReport(external_id, report_date) — spec §4.4. `argMax` over
    // `etl_processed_at` implements version-wins without requiring callers
    // to add `FINAL` to every query.
    "CREATE VIEW IF NOT EXISTS daily_report AS
    WITH latest AS (
        SELECT
            external_id, prosthesis_id, report_date, report_hour,
            argMax(movements_count, etl_processed_at) AS movements_count,
            argMax(successful_movements, etl_processed_at) AS successful_movements,
            argMax(avg_response_time_ms, etl_processed_at) AS avg_response_time_ms,
            argMax(avg_battery_level, etl_processed_at) AS avg_battery_level,
            argMax(min_battery_level, etl_processed_at) AS min_battery_level,
            argMax(avg_actuator_temp_c, etl_processed_at) AS avg_actuator_temp_c,
            argMax(max_actuator_temp_c, etl_processed_at) AS max_actuator_temp_c,
            argMax(avg_connection_quality, etl_processed_at) AS avg_connection_quality,
            argMax(error_count, etl_processed_at) AS error_count
        FROM user_prosthesis_stats
        GROUP BY external_id, prosthesis_id, report_date, report_hour
    )
    SELECT
        external_id,
        report_date,
        sum(movements_count) AS daily_movements,
        sum(successful_movements) AS daily_successful,
        if(sum(movements_count) = 0, 0.0,
           round(sum(successful_movements) / sum(movements_count) * 100, 2)) AS daily_success_rate,
        avg(avg_response_time_ms) AS avg_response_time_ms,
        avg(avg_battery_level) AS avg_battery_percent,
        avg(avg_actuator_temp_c) AS avg_temp_celsius,
        avg(avg_connection_quality) AS avg_connection_quality,
        min(min_battery_level) AS min_battery_percent,
        max(max_actuator_temp_c) AS max_temp_celsius,
        sum(error_count) AS daily_errors,
        uniqExact(report_hour) AS active_hours
    FROM latest
    GROUP BY external_id, report_date",

    // UserSummary(external_id) — spec §4.4. `avg_response_time_ms`/
    // `avg_battery_percent` are "unweighted averages over hourly rows"
    // (every hour across the user's lifetime weighted equally), which an
    // `avg()` of `daily_report`'s per-day averages does not give — a day
    // with 1 active hour would count the same as a day with 20. So those
    // two columns are computed straight off the deduplicated hourly rows,
    // grouped only by `external_id`, and joined onto the per-day totals
    // `daily_report` already provides.
    "CREATE VIEW IF NOT EXISTS user_summary AS
    WITH hourly AS (
        SELECT
            external_id, prosthesis_id, report_date, report_hour,
            argMax(avg_response_time_ms, etl_processed_at) AS avg_response_time_ms,
            argMax(avg_battery_level, etl_processed_at) AS avg_battery_level
        FROM user_prosthesis_stats
        GROUP BY external_id, prosthesis_id, report_date, report_hour
    ),
    hourly_avg AS (
        SELECT
            external_id,
            avg(avg_response_time_ms) AS avg_response_time_ms,
            avg(avg_battery_level) AS avg_battery_percent
        FROM hourly
        GROUP BY external_id
    )
    SELECT
        d.external_id AS external_id,
        min(d.report_date) AS first_activity_date,
        max(d.report_date) AS last_activity_date,
        dateDiff('day', min(d.report_date), max(d.report_date)) + 1 AS total_days,
        uniqExact(d.report_date) AS active_days,
        sum(d.daily_movements) AS total_movements,
        sum(d.daily_successful) AS total_successful,
        if(sum(d.daily_movements) = 0, 0.0,
           round(sum(d.daily_successful) / sum(d.daily_movements) * 100, 2)) AS overall_success_rate,
        any(h.avg_response_time_ms) AS avg_response_time_ms,
        any(h.avg_battery_percent) AS avg_battery_percent,
        sum(d.daily_errors) AS total_errors,
        if(uniqExact(d.report_date) = 0, 0.0,
           round(sum(d.daily_errors) / uniqExact(d.report_date), 2)) AS avg_errors_per_day
    FROM daily_report d
    LEFT JOIN hourly_avg h ON h.external_id = d.external_id
    GROUP BY d.external_id",
];

/// Apply CRM-side (Postgres) migrations, including the CDC replica schema
/// (created regardless of `source.mode` so switching modes needs no
/// migration step of its own).
pub async fn run_crm(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("running CRM migrations ({} statements)", CRM_MIGRATIONS.len());
    for sql in CRM_MIGRATIONS {
        sqlx::query(sql).execute(pool).await?;
    }
    for sql in CRM_REPLICA_MIGRATIONS {
        sqlx::query(sql).execute(pool).await?;
    }
    tracing::info!("CRM migrations complete");
    Ok(())
}

/// Apply telemetry-store (ClickHouse) migrations.
pub async fn run_telemetry(client: &Client) -> anyhow::Result<()> {
    tracing::info!(
        "running telemetry migrations ({} statements)",
        TELEMETRY_MIGRATIONS.len()
    );
    for sql in TELEMETRY_MIGRATIONS {
        client.query(sql).execute().await?;
    }
    tracing::info!("telemetry migrations complete");
    Ok(())
}

/// Apply mart-store (ClickHouse) migrations: the fact table (TTL carrying
/// `retention_days`) plus the two aggregation views.
pub async fn run_mart(client: &Client, retention_days: u32) -> anyhow::Result<()> {
    tracing::info!(
        "running mart migrations ({} statements)",
        MART_VIEW_MIGRATIONS.len() + 1
    );
    client
        .query(&user_prosthesis_stats_ddl(retention_days))
        .execute()
        .await?;
    for sql in MART_VIEW_MIGRATIONS {
        client.query(sql).execute().await?;
    }
    tracing::info!("mart migrations complete");
    Ok(())
}

/// Run every migration set. Called once at startup by both binaries, the
/// same way `rush-api`'s `migrations::run` is called from `main` and from
/// `bin/anomaly_engine.rs`.
pub async fn run_all(
    crm_pool: &PgPool,
    telemetry_client: &Client,
    mart_client: &Client,
    retention_days: u32,
) -> anyhow::Result<()> {
    run_crm(crm_pool).await?;
    run_telemetry(telemetry_client).await?;
    run_mart(mart_client, retention_days).await?;
    Ok(())
}
