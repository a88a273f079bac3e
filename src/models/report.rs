use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// `DailyReport(external_id, report_date)` of spec §4.4, queried straight
/// off the `daily_report` ClickHouse view (`crate::migrations::mart`).
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct DailyReport {
    pub external_id: String,
    #[serde(with = "clickhouse::serde::chrono::date")]
    pub report_date: chrono::NaiveDate,

    pub daily_movements: u64,
    pub daily_successful: u64,
    pub daily_success_rate: f64,

    pub avg_response_time_ms: f64,
    pub avg_battery_percent: f64,
    pub avg_temp_celsius: f64,
    pub avg_connection_quality: f64,

    pub min_battery_percent: f64,
    pub max_temp_celsius: f64,

    pub daily_errors: u64,
    pub active_hours: u64,
}

/// `UserSummary(external_id)` of spec §4.4, the lifetime roll-up.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct UserSummary {
    pub external_id: String,

    #[serde(with = "clickhouse::serde::chrono::date")]
    pub first_activity_date: chrono::NaiveDate,
    #[serde(with = "clickhouse::serde::chrono::date")]
    pub last_activity_date: chrono::NaiveDate,
    pub total_days: u64,
    pub active_days: u64,

    pub total_movements: u64,
    pub total_successful: u64,
    pub overall_success_rate: f64,

    pub avg_response_time_ms: f64,
    pub avg_battery_percent: f64,

    pub total_errors: u64,
    pub avg_errors_per_day: f64,
}
