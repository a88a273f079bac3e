use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// The mart row: one hourly fact per `(external_id, prosthesis_id,
/// report_date, report_hour)`, denormalized with reference attributes at
/// load time. Storage is append-only (`ReplacingMergeTree(etl_processed_at)`,
/// see `crate::migrations::mart`); logical uniqueness per semantic key is a
/// read-time guarantee, not a storage-time one.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct UserProsthesisStat {
    pub external_id: String,
    pub prosthesis_id: i64,
    #[serde(with = "clickhouse::serde::chrono::date")]
    pub report_date: chrono::NaiveDate,
    pub report_hour: u8,

    // Denormalized customer attributes.
    pub customer_id: i64,
    pub customer_name: String,
    pub email: String,
    pub region: String,
    pub branch: String,

    // Denormalized prosthesis/model attributes.
    pub serial_number: String,
    pub chip_id: String,
    pub firmware_version: String,
    pub model_code: String,
    pub model_name: String,
    pub category: String,

    // Telemetry metrics, carried through unchanged.
    pub movements_count: u64,
    pub successful_movements: u64,
    pub success_rate: f64,

    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,

    pub avg_battery_level: f64,
    pub min_battery_level: f64,
    pub max_battery_level: f64,

    pub avg_actuator_temp_c: f64,
    pub max_actuator_temp_c: f64,

    pub error_count: u64,
    pub warning_count: u64,

    pub avg_myo_amplitude: f64,
    pub avg_connection_quality: f64,

    // ETL stamps.
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub etl_processed_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub source_updated_at: chrono::DateTime<chrono::Utc>,
}
